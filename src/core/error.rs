//! Error types for configuration, parsing and operator commands.
//!
//! Operational conditions (panic entered, admission rejected, stale
//! override) are values, not errors. These variants only surface where a
//! caller asked for something by name or supplied configuration.

use thiserror::Error;

/// Errors produced while loading configuration or resolving names.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Integration name does not match any known integration.
    #[error("unknown integration: {0}")]
    UnknownIntegration(String),
    /// Capability path does not match any registered capability.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration or command payload could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Application-facing result using anyhow for process bootstrap.
pub type AppResult<T> = Result<T, anyhow::Error>;
