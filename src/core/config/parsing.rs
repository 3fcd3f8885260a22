use std::env;

use super::types::{ConfigError, Environment};

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_usize(field: &'static str, value: String) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_f64(field: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

/// Accepts a JSON array or a comma-separated list. Empty means any origin.
pub(super) fn parse_cors_origins(value: Option<String>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = value else {
        return Ok(Vec::new());
    };

    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(&raw).map_err(|_| ConfigError::InvalidCors(raw.clone()));
    }

    Ok(raw.split(',').map(|item| item.trim().to_string()).filter(|item| !item.is_empty()).collect())
}

/// Ratios gate wholesale category rewrites, so zero would rewrite every submission.
pub(super) fn is_valid_ratio(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cors_origins_formats() {
        assert!(parse_cors_origins(None).expect("none").is_empty());
        assert_eq!(
            parse_cors_origins(Some("http://a.test, http://b.test".to_string())).expect("list"),
            vec!["http://a.test", "http://b.test"]
        );
        assert_eq!(
            parse_cors_origins(Some(r#"["http://a.test"]"#.to_string())).expect("json"),
            vec!["http://a.test"]
        );
        assert!(matches!(
            parse_cors_origins(Some("[oops".to_string())),
            Err(ConfigError::InvalidCors(_))
        ));
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("production".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("staging".to_string())), Environment::Staging);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }

    #[test]
    fn parse_f64_rejects_non_finite() {
        assert!(parse_f64("RATIO", "NaN".to_string()).is_err());
        assert!(parse_f64("RATIO", "inf".to_string()).is_err());
        assert_eq!(parse_f64("RATIO", "0.75".to_string()).expect("ratio"), 0.75);
    }

    #[test]
    fn ratio_bounds() {
        assert!(is_valid_ratio(0.5));
        assert!(is_valid_ratio(1.0));
        assert!(!is_valid_ratio(0.0));
        assert!(!is_valid_ratio(1.2));
    }
}
