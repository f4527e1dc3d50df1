//! Named JSON documents addressable by dotted path.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{Map, Value};

use crate::errors::{Result, TargetflowError};

/// Process-wide store of data maps (`#@import-json`, `[data.<name>]`, ...).
///
/// Paths are dot separated; numeric segments index into arrays:
/// `"services.0.name"`. An empty path (or `"."`) addresses the whole map.
#[derive(Debug, Default)]
pub struct DataMapStore {
    maps: RwLock<HashMap<String, Value>>,
}

impl DataMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        maps.insert(key.into(), value);
    }

    /// Parse `json` and store it under `key`, replacing any previous map.
    pub fn add_from_json(&self, key: &str, json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(json)?;
        self.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.get(key).cloned()
    }

    pub fn get_by_path(&self, key: &str, path: &str) -> Option<Value> {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        let mut current = maps.get(key)?;
        for segment in segments(path) {
            current = match current {
                Value::Object(obj) => obj.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Set the value at `path`, creating the map and intermediate objects as
    /// needed. `value` is stored as JSON if it parses, otherwise as a string.
    pub fn set_by_path(&self, key: &str, path: &str, value: &str) -> Result<()> {
        let new_value =
            serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));

        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        let root = maps
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        let parts: Vec<&str> = segments(path).collect();
        let Some((last, parents)) = parts.split_last() else {
            *root = new_value;
            return Ok(());
        };

        let mut current = root;
        for segment in parents {
            current = child_mut(current, segment, key, path)?;
        }

        match current {
            Value::Object(obj) => {
                obj.insert((*last).to_string(), new_value);
                Ok(())
            }
            Value::Array(items) => {
                let idx = parse_index(last, key, path)?;
                let len = items.len();
                match items.get_mut(idx) {
                    Some(slot) => {
                        *slot = new_value;
                        Ok(())
                    }
                    None if idx == len => {
                        items.push(new_value);
                        Ok(())
                    }
                    None => Err(TargetflowError::DataMap(format!(
                        "index {idx} out of range in '{key}' at '{path}'"
                    ))),
                }
            }
            _ => Err(TargetflowError::DataMap(format!(
                "cannot set '{path}' in '{key}': parent is not an object or array"
            ))),
        }
    }

    pub fn as_json(&self, key: &str) -> Option<String> {
        let value = self.get(key)?;
        serde_json::to_string(&value).ok()
    }

    pub fn as_yaml(&self, key: &str) -> Option<String> {
        let value = self.get(key)?;
        serde_yaml::to_string(&value).ok()
    }

}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

fn parse_index(segment: &str, key: &str, path: &str) -> Result<usize> {
    segment.parse::<usize>().map_err(|_| {
        TargetflowError::DataMap(format!(
            "'{segment}' is not an array index in '{key}' at '{path}'"
        ))
    })
}

fn child_mut<'a>(
    current: &'a mut Value,
    segment: &str,
    key: &str,
    path: &str,
) -> Result<&'a mut Value> {
    match current {
        Value::Object(obj) => Ok(obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let idx = parse_index(segment, key, path)?;
            items.get_mut(idx).ok_or_else(|| {
                TargetflowError::DataMap(format!("index {idx} out of range in '{key}' at '{path}'"))
            })
        }
        _ => Err(TargetflowError::DataMap(format!(
            "cannot descend into '{segment}' in '{key}' at '{path}'"
        ))),
    }
}
