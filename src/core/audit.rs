//! Audit trail for panic-mode transitions.
//!
//! Every manual override and automatic transition produces an
//! [`AuditEvent`]. Where the events end up is the host's choice.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::panic::Integration;

/// Transition recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicAction {
    /// Failure threshold crossed inside the window.
    AutoPanic,
    /// Operator enabled panic mode.
    ManualPanic,
    /// Probe interval elapsed; probing started.
    Recovering,
    /// A probe failed while recovering.
    ProbeFailed,
    /// Enough consecutive successes; integration restored.
    Recovered,
    /// Operator cleared panic mode.
    ManualRecovery,
}

impl PanicAction {
    /// Lowercase tag used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoPanic => "auto_panic",
            Self::ManualPanic => "manual_panic",
            Self::Recovering => "recovering",
            Self::ProbeFailed => "probe_failed",
            Self::Recovered => "recovered",
            Self::ManualRecovery => "manual_recovery",
        }
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Integration the transition applies to.
    pub integration: Integration,
    /// Transition taken.
    pub action: PanicAction,
    /// Operator or automatic reason.
    pub reason: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Bounded in-memory sink. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events for one integration, oldest first.
    pub fn events_for(&self, integration: Integration) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.integration == integration)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that writes events to the `tracing` pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "fieldops_resilience::audit",
            event_id = %event.event_id,
            integration = %event.integration,
            action = event.action.as_str(),
            reason = event.reason.as_deref().unwrap_or(""),
            "panic audit"
        );
    }
}

/// Helper to build an audit event stamped at `created_at_ms`.
pub fn build_audit_event(
    integration: Integration,
    action: PanicAction,
    reason: Option<String>,
    created_at_ms: u128,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        integration,
        action,
        reason,
        created_at_ms,
    }
}
