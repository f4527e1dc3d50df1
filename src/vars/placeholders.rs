//! `${name}` placeholder store.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use regex::{Captures, Regex};

use super::ScopeVars;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}\s]+)\}").expect("valid placeholder regex"));

/// Process-wide key/value map used for `${name}` substitution.
///
/// Shared by every target; concurrent writes to one key are last-writer-wins.
#[derive(Debug, Default)]
pub struct PlaceholderStore {
    values: RwLock<HashMap<String, String>>,
}

impl PlaceholderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from initial values (e.g. `[variables]`).
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(map),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.into(), value.into());
    }

    /// Append `value` to an existing key.
    ///
    /// Returns `false` (and changes nothing) if the key is not defined.
    pub fn append_or_fail(&self, key: &str, value: &str) -> bool {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        match values.get_mut(key) {
            Some(existing) => {
                existing.push_str(value);
                true
            }
            None => false,
        }
    }

    /// Replace every `${name}` in `line`.
    ///
    /// Scope variables win over store values; unknown names are left as-is.
    pub fn resolve_in_string(&self, line: &str, scope: &ScopeVars) -> String {
        if !line.contains("${") {
            return line.to_string();
        }
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        PLACEHOLDER
            .replace_all(line, |caps: &Captures<'_>| {
                let name = &caps[1];
                scope
                    .get(name)
                    .or_else(|| values.get(name))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
