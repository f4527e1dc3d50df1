// tests/pattern_properties.rs

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

use targetflow::requirements::matches_pattern;
use targetflow::types::parse_duration;
use targetflow::vars::PlaceholderStore;

proptest! {
    #[test]
    fn equals_and_not_equals_are_complementary(value in "[a-z0-9]{0,8}", operand in "[a-z0-9]{0,8}") {
        let eq = matches_pattern(&value, &format!("={operand}"));
        let ne = matches_pattern(&value, &format!("!{operand}"));
        prop_assert_ne!(eq, ne);
        prop_assert_eq!(eq, value == operand);
    }

    #[test]
    fn non_empty_operator_ignores_content(value in ".{0,12}") {
        prop_assert_eq!(matches_pattern(&value, "*"), !value.is_empty());
        prop_assert_eq!(matches_pattern(&value, "?"), !value.is_empty());
    }

    #[test]
    fn durations_scale_by_unit(n in 0u64..10_000) {
        prop_assert_eq!(parse_duration(&format!("{n}ms")), Ok(Duration::from_millis(n)));
        prop_assert_eq!(parse_duration(&format!("{n}s")), Ok(Duration::from_secs(n)));
        prop_assert_eq!(parse_duration(&format!("{n}m")), Ok(Duration::from_secs(n * 60)));
    }

    #[test]
    fn text_without_placeholders_is_unchanged(line in "[^$]{0,40}") {
        let store = PlaceholderStore::with_values([("name", "value")]);
        prop_assert_eq!(store.resolve_in_string(&line, &BTreeMap::new()), line);
    }

    #[test]
    fn known_placeholders_are_always_replaced(prefix in "[a-z ]{0,10}", suffix in "[a-z ]{0,10}") {
        let store = PlaceholderStore::with_values([("name", "value")]);
        let line = format!("{prefix}${{name}}{suffix}");
        prop_assert_eq!(
            store.resolve_in_string(&line, &BTreeMap::new()),
            format!("{prefix}value{suffix}")
        );
    }
}
