//! Field selector parsing shared by the store adapters.
//!
//! Selector syntax: comma-separated `key=value` pairs; keys are dotted JSON
//! paths; pairs combine conjunctively. A malformed selector yields a warning
//! and is ignored, so callers fall back to the unfiltered result.

use quasar_core::resource::path_value;

use serde_json::Value;
use tracing::warn;

/// Parse a field selector into path/value pairs. Returns `None` for
/// malformed input (a pair without `=`); the empty selector parses to an
/// empty filter.
pub fn parse(field_selector: &str) -> Option<Vec<(String, String)>> {
    let trimmed = field_selector.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    let mut filters = Vec::new();
    for pair in trimmed.split(',') {
        match pair.split_once('=') {
            Some((path, value)) => {
                filters.push((path.trim().to_string(), value.trim().to_string()));
            }
            None => {
                warn!(msg = "ignoring malformed field selector", field_selector);
                return None;
            }
        }
    }
    Some(filters)
}

/// Conjunctive equality match against dotted paths. Non-string values are
/// compared through their JSON rendering.
pub fn matches(resource: &Value, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(path, expected)| {
        match path_value(resource, path) {
            Some(Value::String(actual)) => actual == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_pairs() {
        let filters = parse("spec.environment=prod, metadata.name=x").unwrap();
        assert_eq!(
            filters,
            vec![
                ("spec.environment".to_string(), "prod".to_string()),
                ("metadata.name".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_empty_is_no_filter() {
        assert_eq!(parse(""), Some(Vec::new()));
        assert_eq!(parse("  "), Some(Vec::new()));
    }

    #[test]
    fn test_parse_malformed_returns_none() {
        assert_eq!(parse("spec.environment"), None);
        assert_eq!(parse("a=1,b"), None);
    }

    #[test]
    fn test_matches_conjunctive() {
        let resource = json!({"spec": {"environment": "prod", "replicas": 3}});
        let filters = parse("spec.environment=prod,spec.replicas=3").unwrap();
        assert!(matches(&resource, &filters));

        let filters = parse("spec.environment=prod,spec.replicas=4").unwrap();
        assert!(!matches(&resource, &filters));
    }

    #[test]
    fn test_matches_missing_path_fails() {
        let resource = json!({"spec": {}});
        let filters = parse("spec.environment=prod").unwrap();
        assert!(!matches(&resource, &filters));
    }
}
