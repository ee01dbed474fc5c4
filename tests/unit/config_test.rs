//! Tests for configuration validation

use std::time::Duration;

use fieldops_resilience::config::{
    FairSchedulerConfig, IntegrationPolicyConfig, PanicConfig, ResilienceConfig,
};
use fieldops_resilience::core::{BreakerPolicy, Integration, ResilienceError};

#[test]
fn test_default_config_is_valid() {
    let config = ResilienceConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.capabilities.stale_after(), Duration::from_secs(86_400));
    assert_eq!(config.scheduler.global_max_active, 100);
    assert_eq!(config.scheduler.per_org_max_active, 10);
    assert_eq!(config.scheduler.max_org_share_percent, 50);
}

#[test]
fn test_default_panic_policies() {
    let panic = PanicConfig::default();
    let afip = panic.policy(Integration::Afip);
    assert_eq!(afip.failure_threshold, 5);
    assert_eq!(afip.window, Duration::from_secs(300));
    assert_eq!(afip.probe_interval, Duration::from_secs(30));
    assert_eq!(afip.required_successes, 3);

    let whatsapp = panic.policy(Integration::Whatsapp);
    assert_eq!(whatsapp.failure_threshold, 10);
    assert_eq!(whatsapp.window, Duration::from_secs(60));

    assert_eq!(
        panic.policy(Integration::VoiceAi).probe_interval,
        Duration::from_secs(10)
    );
}

#[test]
fn test_integration_policy_invalid_threshold() {
    let invalid = IntegrationPolicyConfig {
        failure_threshold: 0,
        window_secs: 60,
        probe_interval_secs: 10,
        required_successes: 3,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_integration_policy_invalid_window() {
    let invalid = IntegrationPolicyConfig {
        failure_threshold: 3,
        window_secs: 0,
        probe_interval_secs: 10,
        required_successes: 3,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_per_org_above_global_rejected() {
    let invalid = FairSchedulerConfig {
        global_max_active: 5,
        per_org_max_active: 10,
        ..FairSchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_share_percent_bounds() {
    let zero = FairSchedulerConfig {
        max_org_share_percent: 0,
        ..FairSchedulerConfig::default()
    };
    assert!(zero.validate().is_err());

    let over = FairSchedulerConfig {
        max_org_share_percent: 101,
        ..FairSchedulerConfig::default()
    };
    assert!(over.validate().is_err());
}

#[test]
fn test_scheduler_alpha_bounds() {
    let invalid = FairSchedulerConfig {
        wait_time_alpha: 0.0,
        ..FairSchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());

    let full_weight = FairSchedulerConfig {
        wait_time_alpha: 1.0,
        ..FairSchedulerConfig::default()
    };
    assert!(full_weight.validate().is_ok());
}

#[test]
fn test_empty_json_uses_defaults() {
    let config = ResilienceConfig::from_json_str("{}").unwrap();
    assert_eq!(config, ResilienceConfig::default());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "capabilities": { "stale_after_secs": 3600 },
        "panic": {
            "integrations": {
                "afip": { "failure_threshold": 2, "window_secs": 30, "probe_interval_secs": 5 }
            }
        },
        "scheduler": { "global_max_active": 20, "per_org_max_active": 4 }
    }"#;

    let config = ResilienceConfig::from_json_str(json).unwrap();
    assert_eq!(config.capabilities.stale_after_secs, 3600);
    assert_eq!(config.scheduler.global_max_active, 20);
    assert_eq!(config.scheduler.per_org_max_active, 4);
    assert_eq!(config.scheduler.max_org_share_percent, 50);

    let afip = config.panic.policy(Integration::Afip);
    assert_eq!(afip.failure_threshold, 2);
    assert_eq!(afip.required_successes, BreakerPolicy::DEFAULT_REQUIRED_SUCCESSES);
    // Integrations left out of the map keep shipped defaults.
    assert_eq!(
        config.panic.policy(Integration::Whatsapp),
        BreakerPolicy::default_for(Integration::Whatsapp)
    );
    assert_eq!(config.panic.policies().count(), Integration::ALL.len());
}

#[test]
fn test_config_from_json_rejects_invalid_values() {
    let json = r#"{ "scheduler": { "global_max_active": 0 } }"#;
    let err = ResilienceConfig::from_json_str(json).unwrap_err();
    assert!(matches!(err, ResilienceError::InvalidConfig(_)));
    assert!(err.to_string().contains("scheduler"));
}

#[test]
fn test_config_from_json_rejects_unknown_integration() {
    let json = r#"{ "panic": { "integrations": { "telegram": {
        "failure_threshold": 1, "window_secs": 1, "probe_interval_secs": 1 } } } }"#;
    let err = ResilienceConfig::from_json_str(json).unwrap_err();
    assert!(matches!(err, ResilienceError::Parse(_)));
}

#[test]
fn test_config_from_missing_file() {
    let err = ResilienceConfig::from_file("/nonexistent/resilience.json").unwrap_err();
    assert!(matches!(err, ResilienceError::Io(_)));
}

#[test]
fn test_policy_round_trip_through_config() {
    let policy = BreakerPolicy::default_for(Integration::Mercadopago);
    let config = IntegrationPolicyConfig::from(policy);
    assert_eq!(config.window_secs, 120);
    assert_eq!(config.to_policy(), policy);
}
