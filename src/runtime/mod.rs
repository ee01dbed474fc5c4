//! Host-facing adapters: operator reports and commands, and the probe driver.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_prober;

pub use api::{
    apply_command, capability_report, health_report, CapabilityReport, CommandOutcome,
    HealthReport, HealthStatus, OperatorCommand, EXIT_DEGRADED, EXIT_HEALTHY, EXIT_INTERNAL_ERROR,
};
#[cfg(feature = "tokio-runtime")]
pub use tokio_prober::{probe_once, ProbeDriver};
