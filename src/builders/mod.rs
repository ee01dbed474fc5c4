//! Builders to construct the resilience context from configuration.

pub mod context_builder;

pub use context_builder::{ContextBuilder, ResilienceContext, CONFIG_PATH_ENV};
