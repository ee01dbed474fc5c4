//! Configuration models for capabilities, panic policies and admission limits.

pub mod resilience;

pub use resilience::{
    CapabilityConfig, FairSchedulerConfig, IntegrationPolicyConfig, PanicConfig, ResilienceConfig,
};
