//! Tests for operator reports and commands

use std::sync::Arc;
use std::time::Duration;

use fieldops_resilience::builders::{ContextBuilder, ResilienceContext};
use fieldops_resilience::config::{FairSchedulerConfig, ResilienceConfig};
use fieldops_resilience::core::{
    Capability, CapabilityCategory, CapabilitySource, CircuitStatus, EnvOverrides, Integration,
    ResilienceError,
};
use fieldops_resilience::runtime::{
    apply_command, capability_report, health_report, HealthStatus, OperatorCommand, EXIT_DEGRADED,
    EXIT_HEALTHY, EXIT_INTERNAL_ERROR,
};
use fieldops_resilience::util::ManualClock;

fn context(clock: Arc<ManualClock>, env: EnvOverrides) -> ResilienceContext {
    let config = ResilienceConfig {
        scheduler: FairSchedulerConfig {
            global_max_active: 2,
            per_org_max_active: 2,
            max_org_share_percent: 100,
            ..FairSchedulerConfig::default()
        },
        ..ResilienceConfig::default()
    };
    ContextBuilder::new(config)
        .with_clock(clock)
        .with_env_overrides(env)
        .build()
        .unwrap()
}

#[test]
fn test_exit_codes_are_distinct() {
    assert_eq!(EXIT_HEALTHY, 0);
    assert_eq!(EXIT_DEGRADED, 1);
    assert_ne!(EXIT_INTERNAL_ERROR, EXIT_HEALTHY);
    assert_ne!(EXIT_INTERNAL_ERROR, EXIT_DEGRADED);
}

#[test]
fn test_health_report_healthy() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());
    let report = health_report(&ctx);
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.exit_code(), EXIT_HEALTHY);
    assert!(report.problems.is_empty());
    assert_eq!(report.integrations.integrations.len(), Integration::ALL.len());
}

#[test]
fn test_health_report_degraded_by_panic() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());
    ctx.panic.enable_panic(Integration::Whatsapp, "Meta outage");

    let report = health_report(&ctx);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.exit_code(), EXIT_DEGRADED);
    assert_eq!(report.problems.len(), 1);
    assert!(report.problems[0].contains("whatsapp is PANIC: Meta outage"));

    let json = report.to_json_pretty().unwrap();
    assert!(json.contains("\"status\": \"degraded\""));
}

#[test]
fn test_health_report_degraded_by_stale_override() {
    let clock = Arc::new(ManualClock::new(0));
    let env = EnvOverrides::from_vars([("CAPABILITY_EXTERNAL_MERCADOPAGO", "false")], 0);
    let ctx = context(clock.clone(), env);
    assert_eq!(health_report(&ctx).status, HealthStatus::Healthy);

    clock.advance(Duration::from_secs(25 * 3600));
    let report = health_report(&ctx);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.stale_overrides.len(), 1);
    assert!(report.problems[0].contains("stale env override on external.mercadopago"));
}

#[test]
fn test_health_report_degraded_at_global_ceiling() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());
    assert!(ctx.scheduler.admit("org-a", "jobs").is_allowed());
    assert!(ctx.scheduler.admit("org-b", "jobs").is_allowed());

    let report = health_report(&ctx);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.problems[0].contains("global ceiling (2/2)"));

    ctx.scheduler.record_complete("org-a", 10);
    assert_eq!(health_report(&ctx).status, HealthStatus::Healthy);
}

#[test]
fn test_capability_report_groups_every_category() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());
    let report = capability_report(&ctx.registry);
    let categories: Vec<_> = report.groups.iter().map(|g| g.category).collect();
    assert_eq!(categories, CapabilityCategory::ALL.to_vec());
    let total: usize = report.groups.iter().map(|g| g.capabilities.len()).sum();
    assert_eq!(total, Capability::ALL.len());
    assert!(report.stale_overrides.is_empty());
}

#[test]
fn test_enable_and_disable_panic_commands() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());

    let cmd = OperatorCommand::from_json_str(
        r#"{"command":"enable_panic","integration":"whatsapp","reason":"Meta outage"}"#,
    )
    .unwrap();
    let outcome = apply_command(&ctx, cmd).unwrap();
    assert!(outcome.changed);
    assert_eq!(ctx.panic.status(Integration::Whatsapp).status, CircuitStatus::Panic);

    let outcome = apply_command(
        &ctx,
        OperatorCommand::DisablePanic {
            integration: "whatsapp".into(),
            reason: "confirmed restored".into(),
        },
    )
    .unwrap();
    assert!(outcome.changed);
    assert_eq!(ctx.panic.status(Integration::Whatsapp).status, CircuitStatus::Healthy);

    let again = apply_command(
        &ctx,
        OperatorCommand::DisablePanic {
            integration: "whatsapp".into(),
            reason: "double check".into(),
        },
    )
    .unwrap();
    assert!(!again.changed);
}

#[test]
fn test_capability_commands() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());

    let outcome = apply_command(
        &ctx,
        OperatorCommand::SetCapability {
            path: "domain.offline_sync".into(),
            value: false,
            reason: "sync storm".into(),
        },
    )
    .unwrap();
    assert!(outcome.changed);
    let state = ctx.registry.get("domain.offline_sync");
    assert!(!state.value);
    assert_eq!(state.source, CapabilitySource::Runtime);
    assert_eq!(state.reason.as_deref(), Some("sync storm"));

    let outcome = apply_command(
        &ctx,
        OperatorCommand::ClearCapability {
            path: "domain.offline_sync".into(),
        },
    )
    .unwrap();
    assert!(outcome.changed);
    assert_eq!(
        ctx.registry.get("domain.offline_sync").source,
        CapabilitySource::Default
    );
}

#[test]
fn test_capability_commands_refused_during_panic() {
    let env = EnvOverrides::from_vars([("CAPABILITY_EXTERNAL_AFIP", "true")], 0);
    let ctx = context(Arc::new(ManualClock::new(0)), env);
    ctx.registry
        .set_runtime_override(Capability::ExternalAfip, true, "pre-incident pin");
    ctx.panic.enable_panic(Integration::Afip, "WSFE down");

    let clear = apply_command(
        &ctx,
        OperatorCommand::ClearCapability {
            path: "external.afip".into(),
        },
    )
    .unwrap();
    assert!(!clear.changed);
    assert!(clear.message.contains("disable_panic"));

    let set = apply_command(
        &ctx,
        OperatorCommand::SetCapability {
            path: "external.afip".into(),
            value: true,
            reason: "force it back".into(),
        },
    )
    .unwrap();
    assert!(!set.changed);
    assert!(set.message.contains("disable_panic"));

    assert!(!ctx.registry.is_enabled(Capability::ExternalAfip));
    assert_eq!(ctx.registry.get("external.afip").source, CapabilitySource::Panic);
    assert_eq!(ctx.panic.status(Integration::Afip).status, CircuitStatus::Panic);
    let pinned = ctx.registry.runtime_override(Capability::ExternalAfip).unwrap();
    assert_eq!(pinned.reason, "pre-incident pin");

    // Other capabilities stay editable, and afip is editable again once panic ends.
    let other = apply_command(
        &ctx,
        OperatorCommand::SetCapability {
            path: "external.whatsapp".into(),
            value: false,
            reason: "contract paused".into(),
        },
    )
    .unwrap();
    assert!(other.changed);

    assert!(ctx.panic.disable_panic(Integration::Afip, "WSFE restored"));
    let clear = apply_command(
        &ctx,
        OperatorCommand::ClearCapability {
            path: "external.afip".into(),
        },
    )
    .unwrap();
    assert!(clear.changed);
    assert_eq!(ctx.registry.get("external.afip").source, CapabilitySource::Env);
}

#[test]
fn test_commands_reject_unknown_names() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());

    let err = apply_command(
        &ctx,
        OperatorCommand::EnablePanic {
            integration: "telegram".into(),
            reason: "typo".into(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, ResilienceError::UnknownIntegration(_)));

    let err = apply_command(
        &ctx,
        OperatorCommand::ClearCapability {
            path: "external.doesnotexist".into(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, ResilienceError::UnknownCapability(_)));

    assert!(OperatorCommand::from_json_str(r#"{"command":"reboot"}"#).is_err());
}

#[test]
fn test_reset_org_command() {
    let ctx = context(Arc::new(ManualClock::new(0)), EnvOverrides::empty());
    assert!(ctx.scheduler.admit("org-a", "jobs").is_allowed());

    let busy = apply_command(&ctx, OperatorCommand::ResetOrg { org_id: "org-a".into() }).unwrap();
    assert!(!busy.changed);

    ctx.scheduler.record_fail("org-a");
    let idle = apply_command(&ctx, OperatorCommand::ResetOrg { org_id: "org-a".into() }).unwrap();
    assert!(idle.changed);
    assert!(ctx.scheduler.org_stats("org-a").is_none());
}
