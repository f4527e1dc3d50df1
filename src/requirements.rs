// src/requirements.rs

//! Pure predicates: may a block run, and does a line of output match a
//! trigger.
//!
//! Nothing here has side effects besides reading the placeholder store, the
//! environment and the filesystem. Every result carries a human-readable
//! reason so that a skipped block or a fired trigger can be explained
//! without re-running.

use std::path::Path;

use crate::config::model::{Requirement, Trigger};
use crate::vars::{PlaceholderStore, ScopeVars};

/// Outcome of [`check_requirements`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementCheck {
    pub passed: bool,
    pub reason: String,
}

impl RequirementCheck {
    fn pass() -> Self {
        Self {
            passed: true,
            reason: "all requirements met".to_string(),
        }
    }

    fn fail(reason: String) -> Self {
        Self {
            passed: false,
            reason,
        }
    }
}

/// Per-line trigger evaluation. Not stored anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    pub matched: bool,
    pub reason: String,
}

impl TriggerMatch {
    fn hit(reason: String) -> Self {
        Self {
            matched: true,
            reason,
        }
    }

    fn miss() -> Self {
        Self {
            matched: false,
            reason: String::new(),
        }
    }
}

/// What a trigger is evaluated against.
///
/// Output-based rules only apply when `output` is present; `on_error` only
/// when `error` is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasonInput<'a> {
    pub output: Option<&'a str>,
    pub error: Option<&'a str>,
}

impl<'a> ReasonInput<'a> {
    pub fn line(output: &'a str) -> Self {
        Self {
            output: Some(output),
            error: None,
        }
    }

    pub fn error(error: &'a str) -> Self {
        Self {
            output: None,
            error: Some(error),
        }
    }
}

/// `linux`, `macos`, `windows`, ... or the family (`unix`, `windows`).
pub fn os_matches(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == std::env::consts::OS || name == std::env::consts::FAMILY
}

/// AND of every configured requirement; the first failure is reported.
///
/// Relative paths in `exists` / `not_exists` resolve against `cwd`.
pub fn check_requirements(
    req: &Requirement,
    placeholders: &PlaceholderStore,
    scope: &ScopeVars,
    cwd: &Path,
) -> RequirementCheck {
    if let Some(ref system) = req.system {
        let system = placeholders.resolve_in_string(system, scope);
        if !system.is_empty() && !os_matches(&system) {
            return RequirementCheck::fail(format!(
                "requires os '{}' but running on '{}'",
                system,
                std::env::consts::OS
            ));
        }
    }

    for raw in req.exists.iter() {
        let path = placeholders.resolve_in_string(raw, scope);
        if !cwd.join(&path).exists() {
            return RequirementCheck::fail(format!("required path '{path}' does not exist"));
        }
    }

    for raw in req.not_exists.iter() {
        let path = placeholders.resolve_in_string(raw, scope);
        if cwd.join(&path).exists() {
            return RequirementCheck::fail(format!("path '{path}' exists but must not"));
        }
    }

    for (name, pattern) in req.environment.iter() {
        let value = std::env::var(name).unwrap_or_default();
        let pattern = placeholders.resolve_in_string(pattern, scope);
        if !matches_pattern(&value, &pattern) {
            return RequirementCheck::fail(format!(
                "environment variable '{name}' with value '{value}' does not match '{pattern}'"
            ));
        }
    }

    for (name, pattern) in req.variables.iter() {
        let value = scope
            .get(name)
            .cloned()
            .or_else(|| placeholders.get(name))
            .unwrap_or_default();
        let pattern = placeholders.resolve_in_string(pattern, scope);
        if !matches_pattern(&value, &pattern) {
            return RequirementCheck::fail(format!(
                "variable '{name}' with value '{value}' does not match '{pattern}'"
            ));
        }
    }

    RequirementCheck::pass()
}

/// Match `value` against a requirement pattern.
///
/// The first character is the operator, the rest the operand:
/// `=` equals, `!` not equals, `>` / `<` lexicographic compare,
/// `?` / `*` non-empty. Without an operator the whole pattern must equal
/// the value.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    let mut chars = pattern.chars();
    let Some(op) = chars.next() else {
        return value.is_empty();
    };
    let operand = chars.as_str();

    match op {
        '=' => value == operand,
        '!' => value != operand,
        '>' => value > operand,
        '<' => value < operand,
        '?' | '*' => !value.is_empty(),
        _ => value == pattern,
    }
}

/// Evaluate a trigger. The first matching rule wins, in this order:
/// `now`, `on_error`, `on_out_count_less`, `on_out_count_more`,
/// `on_out_contains` (declared order).
pub fn check_reason(
    trigger: &Trigger,
    input: ReasonInput<'_>,
    placeholders: &PlaceholderStore,
    scope: &ScopeVars,
) -> TriggerMatch {
    if trigger.now {
        return TriggerMatch::hit("now".to_string());
    }

    if trigger.on_error {
        if let Some(err) = input.error {
            return TriggerMatch::hit(format!("error occurred: {err}"));
        }
    }

    let Some(output) = input.output else {
        return TriggerMatch::miss();
    };
    let len = output.chars().count();

    if trigger.on_out_count_less > 0 && len < trigger.on_out_count_less {
        return TriggerMatch::hit(format!(
            "output length {len} is less than {}",
            trigger.on_out_count_less
        ));
    }

    if trigger.on_out_count_more > 0 && len > trigger.on_out_count_more {
        return TriggerMatch::hit(format!(
            "output length {len} is more than {}",
            trigger.on_out_count_more
        ));
    }

    for raw in trigger.on_out_contains.iter() {
        let needle = placeholders.resolve_in_string(raw, scope);
        if !needle.is_empty() && output.contains(&needle) {
            return TriggerMatch::hit(format!("found '{needle}'"));
        }
    }

    TriggerMatch::miss()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn contains(needles: &[&str]) -> Trigger {
        Trigger {
            on_out_contains: needles.iter().map(|s| s.to_string()).collect(),
            ..Trigger::default()
        }
    }

    #[test]
    fn pattern_operators() {
        assert!(matches_pattern("dev", "=dev"));
        assert!(!matches_pattern("prod", "=dev"));
        assert!(matches_pattern("prod", "!dev"));
        assert!(matches_pattern("b", ">a"));
        assert!(matches_pattern("a", "<b"));
        assert!(matches_pattern("x", "*"));
        assert!(matches_pattern("x", "?"));
        assert!(!matches_pattern("", "*"));
        assert!(matches_pattern("plain", "plain"));
        assert!(!matches_pattern("plain", "other"));
        assert!(matches_pattern("", ""));
    }

    #[test]
    fn missing_file_fails_with_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let req = Requirement {
            exists: vec!["missing.txt".to_string()],
            ..Requirement::default()
        };
        let check = check_requirements(&req, &PlaceholderStore::new(), &ScopeVars::new(), dir.path());
        assert!(!check.passed);
        assert!(check.reason.contains("missing.txt"));
    }

    #[test]
    fn exists_and_not_exists_resolve_against_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "x").unwrap();
        let req = Requirement {
            exists: vec!["present.txt".to_string()],
            not_exists: vec!["${lock}".to_string()],
            ..Requirement::default()
        };
        let store = PlaceholderStore::with_values([("lock", "build.lock")]);
        let check = check_requirements(&req, &store, &ScopeVars::new(), dir.path());
        assert!(check.passed, "{}", check.reason);
    }

    #[test]
    fn wrong_os_is_reported() {
        let req = Requirement {
            system: Some("no-such-os".to_string()),
            ..Requirement::default()
        };
        let check = check_requirements(&req, &PlaceholderStore::new(), &ScopeVars::new(), Path::new("."));
        assert!(!check.passed);
        assert!(check.reason.contains("no-such-os"));
    }

    #[test]
    fn os_family_and_case_are_accepted() {
        for system in [
            std::env::consts::FAMILY.to_string(),
            std::env::consts::OS.to_ascii_uppercase(),
        ] {
            let req = Requirement {
                system: Some(system),
                ..Requirement::default()
            };
            let check =
                check_requirements(&req, &PlaceholderStore::new(), &ScopeVars::new(), Path::new("."));
            assert!(check.passed, "{}", check.reason);
        }
    }

    #[test]
    fn variable_patterns_prefer_scope() {
        let mut variables = BTreeMap::new();
        variables.insert("mode".to_string(), "=dev".to_string());
        let req = Requirement {
            variables,
            ..Requirement::default()
        };
        let store = PlaceholderStore::with_values([("mode", "prod")]);
        let mut scope = ScopeVars::new();

        let check = check_requirements(&req, &store, &scope, Path::new("."));
        assert!(!check.passed);

        scope.insert("mode".to_string(), "dev".to_string());
        let check = check_requirements(&req, &store, &scope, Path::new("."));
        assert!(check.passed);
    }

    #[test]
    fn first_matching_substring_wins() {
        let store = PlaceholderStore::with_values([("word", "beta")]);
        let trigger = contains(&["gamma", "${word}", "alpha"]);
        let hit = check_reason(
            &trigger,
            ReasonInput::line("alpha beta"),
            &store,
            &ScopeVars::new(),
        );
        assert!(hit.matched);
        assert_eq!(hit.reason, "found 'beta'");
    }

    #[test]
    fn output_rules_ignore_error_only_input() {
        let trigger = Trigger {
            on_out_count_less: 5,
            ..Trigger::default()
        };
        let store = PlaceholderStore::new();
        let scope = ScopeVars::new();
        assert!(!check_reason(&trigger, ReasonInput::error("exit 1"), &store, &scope).matched);
        assert!(check_reason(&trigger, ReasonInput::line("abc"), &store, &scope).matched);
        assert!(!check_reason(&trigger, ReasonInput::line("abcdef"), &store, &scope).matched);
    }

    #[test]
    fn on_error_and_now() {
        let store = PlaceholderStore::new();
        let scope = ScopeVars::new();
        let on_error = Trigger {
            on_error: true,
            ..Trigger::default()
        };
        assert!(check_reason(&on_error, ReasonInput::error("boom"), &store, &scope).matched);
        assert!(!check_reason(&on_error, ReasonInput::line("boom"), &store, &scope).matched);

        let now = Trigger {
            now: true,
            ..Trigger::default()
        };
        assert_eq!(
            check_reason(&now, ReasonInput::default(), &store, &scope).reason,
            "now"
        );
        assert!(!check_reason(&Trigger::default(), ReasonInput::line("x"), &store, &scope).matched);
    }
}
