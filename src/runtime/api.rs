//! Operator-facing report and command models.
//!
//! Status and override tools are thin wrappers over these functions: they
//! parse argv, call in here, print the serialized result and exit with
//! [`HealthReport::exit_code`].

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::builders::ResilienceContext;
use crate::core::{
    Capability, CapabilityGroup, CapabilityRegistry, CircuitStatus, Integration, ResilienceError,
    SchedulerMetrics, StaleOverride, StatusSummary,
};

/// Exit code when everything is healthy.
pub const EXIT_HEALTHY: i32 = 0;
/// Exit code when something is degraded.
pub const EXIT_DEGRADED: i32 = 1;
/// Exit code when the tool itself failed.
pub const EXIT_INTERNAL_ERROR: i32 = 2;

/// Overall verdict of a health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing needs attention.
    Healthy,
    /// At least one problem was found.
    Degraded,
}

/// Capability table plus safety-monitor findings.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    /// Capabilities grouped by category.
    pub groups: Vec<CapabilityGroup>,
    /// Overrides older than the stale threshold.
    pub stale_overrides: Vec<StaleOverride>,
}

/// Combined status of all three components.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Panic controller summary.
    pub integrations: StatusSummary,
    /// Fair scheduler metrics.
    pub scheduler: SchedulerMetrics,
    /// Stale capability overrides.
    pub stale_overrides: Vec<StaleOverride>,
    /// Human-readable list of what made the report degraded.
    pub problems: Vec<String>,
}

impl HealthReport {
    /// Process exit code for status tools.
    pub const fn exit_code(&self) -> i32 {
        match self.status {
            HealthStatus::Healthy => EXIT_HEALTHY,
            HealthStatus::Degraded => EXIT_DEGRADED,
        }
    }

    /// Pretty JSON rendering.
    pub fn to_json_pretty(&self) -> Result<String, ResilienceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Build the capability listing; runs the safety monitor.
pub fn capability_report(registry: &CapabilityRegistry) -> CapabilityReport {
    CapabilityReport {
        groups: registry.list_all().collect(),
        stale_overrides: registry.safety_check(),
    }
}

/// Build the combined health report.
pub fn health_report(ctx: &ResilienceContext) -> HealthReport {
    let integrations = ctx.panic.get_status_summary();
    let scheduler = ctx.scheduler.get_metrics();
    let stale_overrides = ctx.registry.safety_check();

    let mut problems: Vec<String> = integrations
        .degraded()
        .map(|s| {
            let reason = s.panic_reason.as_deref().unwrap_or("no reason recorded");
            format!("{} is {}: {reason}", s.integration, s.status.as_str())
        })
        .collect();
    problems.extend(stale_overrides.iter().map(|s| {
        format!(
            "stale {} override on {} ({}h old)",
            s.source.as_str(),
            s.path,
            s.age_ms / 3_600_000
        )
    }));
    if scheduler.at_capacity() {
        problems.push(format!(
            "scheduler at global ceiling ({}/{})",
            scheduler.global_active, scheduler.global_max_active
        ));
    }

    let status = if problems.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        integrations,
        scheduler,
        stale_overrides,
        problems,
    }
}

/// Manual override issued by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Force an integration into panic mode.
    EnablePanic {
        /// Integration name.
        integration: String,
        /// Why.
        reason: String,
    },
    /// Clear panic mode without waiting for probes.
    DisablePanic {
        /// Integration name.
        integration: String,
        /// Why.
        reason: String,
    },
    /// Force a capability value. Refused while the owning integration panics.
    SetCapability {
        /// Dotted capability path.
        path: String,
        /// Value to force.
        value: bool,
        /// Why.
        reason: String,
    },
    /// Remove a runtime override. Refused while the owning integration panics.
    ClearCapability {
        /// Dotted capability path.
        path: String,
    },
    /// Forget an idle organization's queue stats.
    ResetOrg {
        /// Organization id.
        org_id: String,
    },
}

impl OperatorCommand {
    /// Parse a command from JSON, e.g. `{"command":"enable_panic",...}`.
    pub fn from_json_str(input: &str) -> Result<Self, ResilienceError> {
        Ok(serde_json::from_str(input)?)
    }
}

/// Result of an operator command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// Whether state changed.
    pub changed: bool,
    /// What happened.
    pub message: String,
}

/// Apply an operator command.
///
/// Unlike the core, this surface reports unknown names as errors so the
/// operator learns about the typo.
pub fn apply_command(
    ctx: &ResilienceContext,
    command: OperatorCommand,
) -> Result<CommandOutcome, ResilienceError> {
    let outcome = match command {
        OperatorCommand::EnablePanic {
            integration,
            reason,
        } => {
            let integration: Integration = integration.parse()?;
            let was = ctx.panic.status(integration).status;
            ctx.panic.enable_panic(integration, reason);
            CommandOutcome {
                changed: was != CircuitStatus::Panic,
                message: format!("{integration} is in panic mode"),
            }
        }
        OperatorCommand::DisablePanic {
            integration,
            reason,
        } => {
            let integration: Integration = integration.parse()?;
            let changed = ctx.panic.disable_panic(integration, reason);
            CommandOutcome {
                changed,
                message: format!("{integration} is healthy"),
            }
        }
        OperatorCommand::SetCapability {
            path,
            value,
            reason,
        } => {
            let capability: Capability = path.parse()?;
            if let Some(integration) = panicking_owner(ctx, capability) {
                return Ok(refuse_during_panic(capability, integration));
            }
            let previous = ctx.registry.get_capability(capability).value;
            ctx.registry.set_runtime_override(capability, value, reason);
            CommandOutcome {
                changed: previous != value,
                message: format!("{capability} forced to {value}"),
            }
        }
        OperatorCommand::ClearCapability { path } => {
            let capability: Capability = path.parse()?;
            if let Some(integration) = panicking_owner(ctx, capability) {
                return Ok(refuse_during_panic(capability, integration));
            }
            let removed = ctx.registry.clear_runtime_override(capability);
            CommandOutcome {
                changed: removed.is_some(),
                message: format!(
                    "{capability} resolves to {}",
                    ctx.registry.get_capability(capability).value
                ),
            }
        }
        OperatorCommand::ResetOrg { org_id } => {
            let changed = ctx.scheduler.reset_org(&org_id);
            let message = if changed {
                format!("queue stats for {org_id} reset")
            } else {
                format!("queue stats for {org_id} kept (unknown or active)")
            };
            CommandOutcome { changed, message }
        }
    };
    info!(changed = outcome.changed, message = %outcome.message, "operator command applied");
    Ok(outcome)
}

/// Integration in panic mode whose capability is `capability`, if any.
fn panicking_owner(ctx: &ResilienceContext, capability: Capability) -> Option<Integration> {
    Integration::ALL
        .into_iter()
        .find(|i| i.capability() == capability && ctx.panic.is_panicking(*i))
}

/// Capability overrides are refused while panic mode holds the capability off.
fn refuse_during_panic(capability: Capability, integration: Integration) -> CommandOutcome {
    warn!(
        capability = %capability,
        integration = %integration,
        "capability override refused during panic mode"
    );
    CommandOutcome {
        changed: false,
        message: format!(
            "{capability} is held off while {integration} is in panic mode; use disable_panic"
        ),
    }
}
