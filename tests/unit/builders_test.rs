//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use fieldops_resilience::builders::ContextBuilder;
use fieldops_resilience::config::{FairSchedulerConfig, IntegrationPolicyConfig, ResilienceConfig};
use fieldops_resilience::core::{
    Capability, CapabilitySource, EnvOverrides, InMemoryAuditSink, Integration, ResilienceError,
};
use fieldops_resilience::util::ManualClock;

#[test]
fn test_builder_defaults() {
    let ctx = ContextBuilder::new(ResilienceConfig::default()).build().unwrap();
    assert!(ctx.panic.get_status_summary().all_healthy());
    assert_eq!(ctx.scheduler.limits().global_max_active, 100);
    assert!(ctx.registry.is_enabled(Capability::ExternalAfip));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = ResilienceConfig {
        scheduler: FairSchedulerConfig {
            per_org_max_active: 0,
            ..FairSchedulerConfig::default()
        },
        ..ResilienceConfig::default()
    };
    let err = ContextBuilder::new(config).build().unwrap_err();
    assert!(matches!(err, ResilienceError::InvalidConfig(_)));
}

#[test]
fn test_builder_wires_env_policies_and_audit() {
    let mut config = ResilienceConfig::default();
    config.panic.integrations.insert(
        Integration::VoiceAi,
        IntegrationPolicyConfig {
            failure_threshold: 1,
            window_secs: 60,
            probe_interval_secs: 5,
            required_successes: 1,
        },
    );
    let env = EnvOverrides::from_vars([("CAPABILITY_DOMAIN_TECHNICIAN_GPS", "false")], 0);
    let audit = InMemoryAuditSink::new(16);
    let clock = Arc::new(ManualClock::new(1_000));

    let builder = ContextBuilder::new(config)
        .with_env_overrides(env)
        .with_clock(clock.clone())
        .with_audit(Arc::new(audit.clone()));
    assert_eq!(builder.config().scheduler.per_org_max_active, 10);
    let ctx = builder.build().unwrap();

    let gps = ctx.registry.get_capability(Capability::DomainTechnicianGps);
    assert!(!gps.value);
    assert_eq!(gps.source, CapabilitySource::Env);

    assert_eq!(ctx.panic.policy(Integration::VoiceAi).probe_interval, Duration::from_secs(5));
    ctx.panic.report_failure(Integration::VoiceAi, "transcription timeout");
    assert!(ctx.panic.is_panicking(Integration::VoiceAi));
    assert!(!ctx.registry.is_enabled(Capability::ExternalVoiceAi));
    assert_eq!(audit.events_for(Integration::VoiceAi).len(), 1);
}

#[test]
fn test_context_clones_share_state() {
    let ctx = ContextBuilder::new(ResilienceConfig::default()).build().unwrap();
    let worker = ctx.clone();

    assert!(worker.scheduler.admit("org-a", "jobs").is_allowed());
    assert_eq!(ctx.scheduler.get_metrics().global_active, 1);

    worker.panic.enable_panic(Integration::Afip, "maintenance window");
    assert!(!ctx.registry.is_enabled(Capability::ExternalAfip));
}
