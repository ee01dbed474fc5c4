//! Tests for audit sinks

use fieldops_resilience::core::{
    build_audit_event, AuditSink, InMemoryAuditSink, Integration, PanicAction, TracingAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        Integration::Whatsapp,
        PanicAction::ManualPanic,
        Some("Meta outage".to_string()),
        1_000,
    );

    sink.record(event);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].integration, Integration::Whatsapp);
    assert_eq!(events[0].action, PanicAction::ManualPanic);
    assert_eq!(events[0].reason.as_deref(), Some("Meta outage"));
    assert_eq!(events[0].created_at_ms, 1_000);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(Integration::Afip, PanicAction::AutoPanic, None, 1));
    sink.record(build_audit_event(Integration::Afip, PanicAction::Recovering, None, 2));
    sink.record(build_audit_event(Integration::Afip, PanicAction::Recovered, None, 3));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, PanicAction::Recovering); // First one popped
    assert_eq!(events[1].action, PanicAction::Recovered);
}

#[test]
fn test_clones_share_buffer() {
    let sink = InMemoryAuditSink::new(8);
    let handle = sink.clone();

    sink.record(build_audit_event(Integration::VoiceAi, PanicAction::AutoPanic, None, 5));
    sink.record(build_audit_event(Integration::Afip, PanicAction::AutoPanic, None, 6));

    assert_eq!(handle.events().len(), 2);
    assert_eq!(handle.events_for(Integration::VoiceAi).len(), 1);
}

#[test]
fn test_build_audit_event_ids_are_unique() {
    let a = build_audit_event(Integration::Mercadopago, PanicAction::ProbeFailed, None, 7);
    let b = build_audit_event(Integration::Mercadopago, PanicAction::ProbeFailed, None, 7);
    assert_ne!(a.event_id, b.event_id);
    assert_eq!(a.event_id.len(), 36);
}

#[test]
fn test_tracing_sink_accepts_events() {
    TracingAuditSink.record(build_audit_event(
        Integration::Afip,
        PanicAction::ManualRecovery,
        Some("maintenance finished".into()),
        9,
    ));
}

#[test]
fn test_actions_serialize_snake_case() {
    let event = build_audit_event(Integration::VoiceAi, PanicAction::ManualRecovery, None, 1);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "manual_recovery");
    assert_eq!(json["integration"], "voice_ai");
}
