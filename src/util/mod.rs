//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use clock::{elapsed_ms, now_ms, Clock, ManualClock, SystemClock};
pub use telemetry::init_tracing;
