//! Builds the registry, panic controller and scheduler once at startup.
//!
//! The resulting [`ResilienceContext`] is the only handle hosts need; clone
//! it into every worker. There are no process-wide statics.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use crate::config::ResilienceConfig;
use crate::core::{
    AppResult, AuditSink, CapabilityRegistry, EnvOverrides, FairScheduler, HealthProbe,
    PanicController, ResilienceError, TracingAuditSink,
};
use crate::util::clock::{Clock, SystemClock};

/// Environment variable pointing at a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "RESILIENCE_CONFIG_PATH";

/// Shared handles to the three resilience components.
#[derive(Debug, Clone)]
pub struct ResilienceContext {
    /// Capability toggles.
    pub registry: Arc<CapabilityRegistry>,
    /// Per-integration panic mode.
    pub panic: Arc<PanicController>,
    /// Multi-tenant admission control.
    pub scheduler: Arc<FairScheduler>,
}

impl ResilienceContext {
    /// Bootstrap from the process environment.
    ///
    /// Loads `.env`, reads the JSON file named by `RESILIENCE_CONFIG_PATH`
    /// (defaults otherwise) and snapshots `CAPABILITY_*` overrides.
    pub fn from_env() -> AppResult<Self> {
        let env = EnvOverrides::from_env();
        let config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => ResilienceConfig::from_file(&path)
                .with_context(|| format!("loading resilience config from {path}"))?,
            Err(_) => ResilienceConfig::default(),
        };
        let ctx = ContextBuilder::new(config)
            .with_env_overrides(env)
            .with_audit(Arc::new(TracingAuditSink))
            .build()
            .context("building resilience context")?;
        Ok(ctx)
    }
}

/// Step-by-step construction of a [`ResilienceContext`].
pub struct ContextBuilder {
    config: ResilienceConfig,
    env: EnvOverrides,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditSink>>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl ContextBuilder {
    /// Start from a configuration; no env overrides, system clock.
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            env: EnvOverrides::empty(),
            clock: Arc::new(SystemClock),
            audit: None,
            probe: None,
        }
    }

    /// Configuration being built.
    pub const fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Use an environment snapshot.
    pub fn with_env_overrides(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    /// Use a specific clock for every component.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record panic transitions in `audit`.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Health check used for recovery probes.
    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Validate the configuration and build the context.
    pub fn build(self) -> Result<ResilienceContext, ResilienceError> {
        self.config
            .validate()
            .map_err(ResilienceError::InvalidConfig)?;

        let registry = Arc::new(CapabilityRegistry::new(
            self.env,
            self.config.capabilities.stale_after(),
            Arc::clone(&self.clock),
        ));

        let mut panic = PanicController::new(Arc::clone(&registry), Arc::clone(&self.clock))
            .with_policies(self.config.panic.policies());
        if let Some(audit) = self.audit {
            panic = panic.with_audit(audit);
        }
        if let Some(probe) = self.probe {
            panic = panic.with_health_probe(probe);
        }

        let scheduler = FairScheduler::new(self.config.scheduler.limits(), self.clock);

        info!(
            env_overrides = registry.env_overrides().len(),
            global_max_active = self.config.scheduler.global_max_active,
            per_org_max_active = self.config.scheduler.per_org_max_active,
            "resilience context built"
        );

        Ok(ResilienceContext {
            registry,
            panic: Arc::new(panic),
            scheduler: Arc::new(scheduler),
        })
    }
}
