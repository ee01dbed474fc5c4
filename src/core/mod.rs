//! Capability toggles, panic mode and fair admission.

pub mod audit;
pub mod capability;
pub mod error;
pub mod fair_scheduler;
pub mod panic;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, PanicAction, TracingAuditSink};
pub use capability::{
    Capability, CapabilityCategory, CapabilityGroup, CapabilityGroups, CapabilityRegistry,
    CapabilitySource, CapabilityState, EnvOverride, EnvOverrides, RuntimeOverride, StaleOverride,
};
pub use error::{AppResult, ResilienceError};
pub use fair_scheduler::{
    Admission, AdmissionRejection, FairScheduler, OrgQueueStats, SchedulerLimits, SchedulerMetrics,
};
pub use panic::{
    BreakerPolicy, CircuitStatus, HealthProbe, Integration, IntegrationStatus, PanicController,
    ProbeOutcome, StatusSummary,
};
