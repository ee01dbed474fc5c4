//! Resilience configuration structures.
//!
//! Every section has defaults, so an empty JSON object is a valid
//! configuration. Durations are whole seconds.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{BreakerPolicy, Integration, ResilienceError, SchedulerLimits};

/// Capability registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Age after which an override is reported as stale.
    pub stale_after_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 24 * 60 * 60,
        }
    }
}

impl CapabilityConfig {
    /// Stale threshold as a duration.
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

const fn default_required_successes() -> u32 {
    BreakerPolicy::DEFAULT_REQUIRED_SUCCESSES
}

/// Breaker policy for one integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationPolicyConfig {
    /// Failures inside the window that trip panic mode.
    pub failure_threshold: u32,
    /// Sliding window length in seconds.
    pub window_secs: u64,
    /// Probe interval in seconds.
    pub probe_interval_secs: u64,
    /// Consecutive successful probes needed to recover.
    #[serde(default = "default_required_successes")]
    pub required_successes: u32,
}

impl IntegrationPolicyConfig {
    /// Validate policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".into());
        }
        if self.window_secs == 0 {
            return Err("window_secs must be greater than 0".into());
        }
        if self.probe_interval_secs == 0 {
            return Err("probe_interval_secs must be greater than 0".into());
        }
        if self.required_successes == 0 {
            return Err("required_successes must be greater than 0".into());
        }
        Ok(())
    }

    /// Convert to the runtime policy.
    pub const fn to_policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: self.failure_threshold,
            window: Duration::from_secs(self.window_secs),
            probe_interval: Duration::from_secs(self.probe_interval_secs),
            required_successes: self.required_successes,
        }
    }
}

impl From<BreakerPolicy> for IntegrationPolicyConfig {
    fn from(policy: BreakerPolicy) -> Self {
        Self {
            failure_threshold: policy.failure_threshold,
            window_secs: policy.window.as_secs(),
            probe_interval_secs: policy.probe_interval.as_secs(),
            required_successes: policy.required_successes,
        }
    }
}

/// Panic controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicConfig {
    /// Policies keyed by integration. Missing integrations use shipped defaults.
    pub integrations: BTreeMap<Integration, IntegrationPolicyConfig>,
}

impl Default for PanicConfig {
    fn default() -> Self {
        Self {
            integrations: Integration::ALL
                .into_iter()
                .map(|i| (i, BreakerPolicy::default_for(i).into()))
                .collect(),
        }
    }
}

impl PanicConfig {
    /// Effective policy for an integration.
    pub fn policy(&self, integration: Integration) -> BreakerPolicy {
        self.integrations
            .get(&integration)
            .map_or_else(|| BreakerPolicy::default_for(integration), IntegrationPolicyConfig::to_policy)
    }

    /// Effective policies for every integration.
    pub fn policies(&self) -> impl Iterator<Item = (Integration, BreakerPolicy)> + '_ {
        Integration::ALL.into_iter().map(|i| (i, self.policy(i)))
    }

    /// Validate all configured policies.
    pub fn validate(&self) -> Result<(), String> {
        for (integration, policy) in &self.integrations {
            policy
                .validate()
                .map_err(|e| format!("integration `{integration}` invalid: {e}"))?;
        }
        Ok(())
    }
}

/// Fair scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairSchedulerConfig {
    /// Maximum active jobs across all organizations.
    pub global_max_active: u32,
    /// Maximum active jobs per organization.
    pub per_org_max_active: u32,
    /// Share cap per organization, percent of the configured `global_max_active`
    /// (not of the jobs currently active).
    pub max_org_share_percent: u8,
    /// Smoothing factor of the wait-time moving average, in `(0, 1]`.
    pub wait_time_alpha: f64,
}

impl Default for FairSchedulerConfig {
    fn default() -> Self {
        let limits = SchedulerLimits::default();
        Self {
            global_max_active: limits.global_max_active,
            per_org_max_active: limits.per_org_max_active,
            max_org_share_percent: limits.max_org_share_percent,
            wait_time_alpha: limits.wait_time_alpha,
        }
    }
}

impl FairSchedulerConfig {
    /// Validate scheduler values.
    pub fn validate(&self) -> Result<(), String> {
        if self.global_max_active == 0 {
            return Err("global_max_active must be greater than 0".into());
        }
        if self.per_org_max_active == 0 {
            return Err("per_org_max_active must be greater than 0".into());
        }
        if self.per_org_max_active > self.global_max_active {
            return Err("per_org_max_active must not exceed global_max_active".into());
        }
        if self.max_org_share_percent == 0 || self.max_org_share_percent > 100 {
            return Err("max_org_share_percent must be within 1..=100".into());
        }
        if !(self.wait_time_alpha > 0.0 && self.wait_time_alpha <= 1.0) {
            return Err("wait_time_alpha must be within (0, 1]".into());
        }
        Ok(())
    }

    /// Convert to runtime limits.
    pub const fn limits(&self) -> SchedulerLimits {
        SchedulerLimits {
            global_max_active: self.global_max_active,
            per_org_max_active: self.per_org_max_active,
            max_org_share_percent: self.max_org_share_percent,
            wait_time_alpha: self.wait_time_alpha,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Capability registry settings.
    pub capabilities: CapabilityConfig,
    /// Panic controller settings.
    pub panic: PanicConfig,
    /// Fair scheduler settings.
    pub scheduler: FairSchedulerConfig,
}

impl ResilienceConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        if self.capabilities.stale_after_secs == 0 {
            return Err("capabilities: stale_after_secs must be greater than 0".into());
        }
        self.panic.validate().map_err(|e| format!("panic: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, ResilienceError> {
        let cfg: Self = serde_json::from_str(input)?;
        cfg.validate().map_err(ResilienceError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ResilienceError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
