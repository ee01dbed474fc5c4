//! # FieldOps Resilience
//!
//! Operational resilience layer for the FieldOps multi-tenant job platform.
//!
//! Three cooperating components, built once at process start and shared by
//! every worker through a [`builders::ResilienceContext`]:
//!
//! - **Capability registry**: named boolean toggles (`external.afip`,
//!   `domain.invoicing`, ...) resolved from a panic override, an operator
//!   override, an environment override or the compiled default. Unknown paths resolve to
//!   `false`, so callers fail closed.
//! - **Panic controller**: a circuit breaker per external integration. Enough
//!   failures inside the sliding window trip "panic mode", which forces the
//!   integration's capability off. Recovery probes close the circuit again
//!   after a run of consecutive successes.
//! - **Fair scheduler**: admission control for shared queue capacity. Global,
//!   per-organization and share-of-capacity ceilings keep one tenant from
//!   starving the others.
//!
//! ## Flow
//!
//! ```rust,ignore
//! use fieldops_resilience::builders::ResilienceContext;
//! use fieldops_resilience::core::{Capability, Integration};
//!
//! let ctx = ResilienceContext::from_env()?;
//!
//! // Queue worker: gate entry before dequeuing.
//! if ctx.scheduler.admit("org-42", "invoices").is_allowed() {
//!     // Call-site: consult the capability before the external call.
//!     if ctx.registry.is_enabled(Capability::ExternalAfip) {
//!         match issue_invoice().await {
//!             Ok(_) => ctx.panic.report_success(Integration::Afip),
//!             Err(e) => ctx.panic.report_failure(Integration::Afip, e),
//!         }
//!     } else {
//!         queue_for_later();
//!     }
//!     ctx.scheduler.record_complete("org-42", waited_ms);
//! }
//! ```
//!
//! With the `tokio-runtime` feature, [`runtime::ProbeDriver`] runs recovery
//! probes on a tick using the host's [`core::HealthProbe`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Capability registry, panic controller, fair scheduler and shared types.
pub mod core;
/// Configuration models and validation.
pub mod config;
/// Builders to construct the resilience context from configuration.
pub mod builders;
/// Operator reports, commands and the probe driver.
pub mod runtime;
/// Shared utilities.
pub mod util;
