//! Tests for error types

use fieldops_resilience::core::{Capability, Integration, ResilienceError};

#[test]
fn test_unknown_integration_error() {
    let err = "telegram".parse::<Integration>().unwrap_err();
    assert!(matches!(err, ResilienceError::UnknownIntegration(_)));
    assert_eq!(format!("{}", err), "unknown integration: telegram");
}

#[test]
fn test_unknown_capability_error() {
    let err = "external.doesnotexist".parse::<Capability>().unwrap_err();
    assert_eq!(format!("{}", err), "unknown capability: external.doesnotexist");
}

#[test]
fn test_invalid_config_error() {
    let err = ResilienceError::InvalidConfig("global_max_active must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: global_max_active must be greater than 0"
    );
}

#[test]
fn test_parse_error_from_serde() {
    let serde_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: ResilienceError = serde_err.into();
    assert!(format!("{}", err).starts_with("parse error:"));
}
