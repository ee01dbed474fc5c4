//! Per-integration circuit breaker ("panic mode").
//!
//! Each integration moves through `HEALTHY -> PANIC -> RECOVERING -> HEALTHY`.
//! While an integration is not healthy its capability is forced off in the
//! [`CapabilityRegistry`], so call-sites take their fallback path without
//! knowing about the breaker.
//!
//! Every integration has its own mutex; reports for different integrations
//! never contend. Lock order is integration state, then registry, then
//! audit sink. Neither of the latter calls back into the controller.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::audit::{build_audit_event, AuditSink, PanicAction};
use crate::core::capability::{Capability, CapabilityRegistry};
use crate::core::ResilienceError;
use crate::util::clock::{elapsed_ms, Clock};

/// External integrations guarded by panic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    /// Tax authority electronic invoicing.
    Afip,
    /// WhatsApp Business API.
    Whatsapp,
    /// MercadoPago payments.
    Mercadopago,
    /// Voice transcription and extraction.
    VoiceAi,
}

impl Integration {
    /// Number of integrations.
    pub const COUNT: usize = 4;

    /// All integrations in reporting order.
    pub const ALL: [Self; Self::COUNT] = [Self::Afip, Self::Whatsapp, Self::Mercadopago, Self::VoiceAi];

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Afip => "afip",
            Self::Whatsapp => "whatsapp",
            Self::Mercadopago => "mercadopago",
            Self::VoiceAi => "voice_ai",
        }
    }

    /// Capability forced off while this integration panics.
    pub const fn capability(self) -> Capability {
        match self {
            Self::Afip => Capability::ExternalAfip,
            Self::Whatsapp => Capability::ExternalWhatsapp,
            Self::Mercadopago => Capability::ExternalMercadopago,
            Self::VoiceAi => Capability::ExternalVoiceAi,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Afip => 0,
            Self::Whatsapp => 1,
            Self::Mercadopago => 2,
            Self::VoiceAi => 3,
        }
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Integration {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "afip" => Ok(Self::Afip),
            "whatsapp" => Ok(Self::Whatsapp),
            "mercadopago" | "mercado_pago" => Ok(Self::Mercadopago),
            "voice_ai" | "voiceai" => Ok(Self::VoiceAi),
            _ => Err(ResilienceError::UnknownIntegration(s.to_string())),
        }
    }
}

/// Trip and recovery thresholds for one integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Failures inside `window` that trip panic mode.
    pub failure_threshold: u32,
    /// Sliding window length.
    pub window: Duration,
    /// Wait before probing after entering panic or after a failed probe.
    pub probe_interval: Duration,
    /// Consecutive successes needed to recover.
    pub required_successes: u32,
}

impl BreakerPolicy {
    /// Default consecutive successes needed to recover.
    pub const DEFAULT_REQUIRED_SUCCESSES: u32 = 3;

    /// Shipped defaults for an integration.
    pub const fn default_for(integration: Integration) -> Self {
        let (failure_threshold, window_secs, probe_secs) = match integration {
            Integration::Afip => (5, 300, 30),
            Integration::Whatsapp => (10, 60, 15),
            Integration::Mercadopago => (5, 120, 30),
            Integration::VoiceAi => (3, 60, 10),
        };
        Self {
            failure_threshold,
            window: Duration::from_secs(window_secs),
            probe_interval: Duration::from_secs(probe_secs),
            required_successes: Self::DEFAULT_REQUIRED_SUCCESSES,
        }
    }
}

/// Circuit state of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitStatus {
    /// Closed: calls flow normally.
    Healthy,
    /// Open: capability forced off, waiting for the probe interval.
    Panic,
    /// Half-open: probing, capability still forced off.
    Recovering,
}

impl CircuitStatus {
    /// Uppercase tag used in reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Panic => "PANIC",
            Self::Recovering => "RECOVERING",
        }
    }
}

/// Point-in-time view of one integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationStatus {
    /// Integration described.
    pub integration: Integration,
    /// Effective circuit state.
    pub status: CircuitStatus,
    /// Failures in the current window (or the count that tripped panic).
    pub failure_count: u32,
    /// Reason recorded on entering panic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panic_reason: Option<String>,
    /// Time since panic was entered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_panic_ms: Option<u64>,
    /// Consecutive successful probes while recovering.
    pub consecutive_successes: u32,
    /// Successes needed to recover.
    pub required_successes: u32,
    /// Whether panic was entered by an operator.
    pub manual: bool,
    /// Most recent reported error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Status of every integration, in [`Integration::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    /// Per-integration entries.
    pub integrations: Vec<IntegrationStatus>,
}

impl StatusSummary {
    /// Entry for one integration.
    pub fn get(&self, integration: Integration) -> Option<&IntegrationStatus> {
        self.integrations.iter().find(|s| s.integration == integration)
    }

    /// Whether every integration is healthy.
    pub fn all_healthy(&self) -> bool {
        self.integrations
            .iter()
            .all(|s| s.status == CircuitStatus::Healthy)
    }

    /// Integrations currently panicking or recovering.
    pub fn degraded(&self) -> impl Iterator<Item = &IntegrationStatus> {
        self.integrations
            .iter()
            .filter(|s| s.status != CircuitStatus::Healthy)
    }
}

/// Host-supplied health check used while recovering.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Perform a lightweight check against the integration.
    async fn check(&self, integration: Integration) -> Result<(), String>;
}

/// Result of a probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Integration is healthy; nothing to probe.
    Skipped,
    /// Probe interval has not elapsed yet.
    NotDue {
        /// Time until the next probe is due.
        remaining_ms: u64,
    },
    /// No [`HealthProbe`] configured.
    NoProbe,
    /// Probe succeeded.
    Succeeded {
        /// Consecutive successes so far.
        consecutive: u32,
        /// Whether this success restored the integration.
        recovered: bool,
    },
    /// Probe failed; integration back in panic.
    Failed {
        /// Failure reported by the probe.
        reason: String,
    },
}

#[derive(Debug)]
struct IntegrationState {
    status: CircuitStatus,
    failures: VecDeque<u128>,
    panic_reason: Option<String>,
    panic_entered_ms: Option<u128>,
    probe_anchor_ms: u128,
    consecutive_successes: u32,
    manual: bool,
    last_error: Option<String>,
}

impl IntegrationState {
    const fn new() -> Self {
        Self {
            status: CircuitStatus::Healthy,
            failures: VecDeque::new(),
            panic_reason: None,
            panic_entered_ms: None,
            probe_anchor_ms: 0,
            consecutive_successes: 0,
            manual: false,
            last_error: None,
        }
    }

    fn probe_due_at(&self, policy: &BreakerPolicy) -> u128 {
        self.probe_anchor_ms + policy.probe_interval.as_millis()
    }

    fn effective_status(&self, policy: &BreakerPolicy, now: u128) -> CircuitStatus {
        match self.status {
            CircuitStatus::Panic if now >= self.probe_due_at(policy) => CircuitStatus::Recovering,
            status => status,
        }
    }

    fn failures_in_window(&self, policy: &BreakerPolicy, now: u128) -> usize {
        let window = policy.window.as_millis();
        self.failures
            .iter()
            .filter(|&&t| t <= now && now - t < window)
            .count()
    }
}

/// Drop failure timestamps that fell out of the window ending at `now`.
fn prune_window(failures: &mut VecDeque<u128>, now: u128, window_ms: u128) {
    while failures.front().is_some_and(|&t| now.saturating_sub(t) >= window_ms) {
        failures.pop_front();
    }
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[derive(Debug)]
struct Slot {
    policy: BreakerPolicy,
    state: Mutex<IntegrationState>,
}

/// Panic controller for all integrations.
pub struct PanicController {
    slots: [Slot; Integration::COUNT],
    registry: Arc<CapabilityRegistry>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditSink>>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl fmt::Debug for PanicController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicController")
            .field("slots", &self.slots)
            .field("has_audit", &self.audit.is_some())
            .field("has_probe", &self.probe.is_some())
            .finish_non_exhaustive()
    }
}

impl PanicController {
    /// Create a controller with default policies; every integration starts healthy.
    pub fn new(registry: Arc<CapabilityRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Integration::ALL.map(|integration| Slot {
                policy: BreakerPolicy::default_for(integration),
                state: Mutex::new(IntegrationState::new()),
            }),
            registry,
            clock,
            audit: None,
            probe: None,
        }
    }

    /// Replace policies for the given integrations.
    pub fn with_policies<I>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = (Integration, BreakerPolicy)>,
    {
        for (integration, mut policy) in policies {
            policy.failure_threshold = policy.failure_threshold.max(1);
            policy.required_successes = policy.required_successes.max(1);
            self.slots[integration.index()].policy = policy;
        }
        self
    }

    /// Attach an audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attach the health check used by [`Self::run_probe`].
    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Policy in force for an integration.
    pub const fn policy(&self, integration: Integration) -> BreakerPolicy {
        self.slots[integration.index()].policy
    }

    /// Registry this controller enforces through.
    pub const fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Record a failed call. May trip panic mode.
    pub fn report_failure(&self, integration: Integration, error: impl fmt::Display) {
        let slot = &self.slots[integration.index()];
        let policy = slot.policy;
        let now = self.clock.now_ms();
        let error = error.to_string();

        let mut state = slot.state.lock();
        self.promote_if_due(integration, &policy, &mut state, now);
        state.last_error = Some(error.clone());

        match state.status {
            CircuitStatus::Healthy => {
                if state.failures.back().is_some_and(|&last| now < last) {
                    debug!(integration = %integration, "clock moved backwards, restarting failure window");
                    state.failures.clear();
                }
                prune_window(&mut state.failures, now, policy.window.as_millis());
                state.failures.push_back(now);
                while state.failures.len() > policy.failure_threshold as usize {
                    state.failures.pop_front();
                }

                let count = to_u32(state.failures.len());
                debug!(
                    integration = %integration,
                    failures = count,
                    threshold = policy.failure_threshold,
                    error = %error,
                    "integration failure reported"
                );
                if count >= policy.failure_threshold {
                    let reason = format!(
                        "{count} failures within {}s: {error}",
                        policy.window.as_secs()
                    );
                    self.enter_panic(integration, &mut state, reason, false, now);
                }
            }
            CircuitStatus::Recovering => {
                self.fail_recovery(integration, &mut state, &error, now);
            }
            CircuitStatus::Panic => {
                debug!(integration = %integration, error = %error, "failure ignored while panicking");
            }
        }
    }

    /// Record a successful call or probe.
    ///
    /// Healthy integrations get a fresh failure window; recovering ones count
    /// it towards the consecutive successes needed to close the circuit.
    pub fn report_success(&self, integration: Integration) {
        let slot = &self.slots[integration.index()];
        let policy = slot.policy;
        let now = self.clock.now_ms();

        let mut state = slot.state.lock();
        self.promote_if_due(integration, &policy, &mut state, now);

        match state.status {
            CircuitStatus::Healthy => {
                if !state.failures.is_empty() {
                    debug!(integration = %integration, "success clears failure window");
                    state.failures.clear();
                }
            }
            CircuitStatus::Recovering => {
                self.succeed_recovery(integration, &policy, &mut state, now);
            }
            CircuitStatus::Panic => {
                debug!(integration = %integration, "success ignored before probe interval elapsed");
            }
        }
    }

    /// [`Self::report_failure`] by name. Unknown names are ignored with a warning.
    pub fn report_failure_by_name(&self, name: &str, error: impl fmt::Display) {
        match name.parse::<Integration>() {
            Ok(integration) => self.report_failure(integration, error),
            Err(e) => warn!(name = %name, "{e}; failure report ignored"),
        }
    }

    /// [`Self::report_success`] by name. Unknown names are ignored with a warning.
    pub fn report_success_by_name(&self, name: &str) {
        match name.parse::<Integration>() {
            Ok(integration) => self.report_success(integration),
            Err(e) => warn!(name = %name, "{e}; success report ignored"),
        }
    }

    /// Enter panic mode immediately, regardless of failure count.
    pub fn enable_panic(&self, integration: Integration, reason: impl Into<String>) {
        let now = self.clock.now_ms();
        let reason = reason.into();
        let mut state = self.slots[integration.index()].state.lock();
        self.enter_panic(integration, &mut state, reason, true, now);
    }

    /// Leave panic mode immediately, bypassing probes.
    ///
    /// Returns `false` if the integration was already healthy.
    pub fn disable_panic(&self, integration: Integration, reason: impl Into<String>) -> bool {
        let now = self.clock.now_ms();
        let reason = reason.into();
        let mut state = self.slots[integration.index()].state.lock();

        if state.status == CircuitStatus::Healthy {
            info!(integration = %integration, reason = %reason, "disable_panic on healthy integration");
            return false;
        }
        self.exit_panic(integration, &mut state, PanicAction::ManualRecovery, Some(reason), now);
        true
    }

    /// Run one recovery probe through the configured [`HealthProbe`].
    ///
    /// The probe runs without holding the integration lock; its result is
    /// applied to whatever state the integration is in when it returns.
    pub async fn run_probe(&self, integration: Integration) -> ProbeOutcome {
        {
            let slot = &self.slots[integration.index()];
            let policy = slot.policy;
            let now = self.clock.now_ms();
            let mut state = slot.state.lock();
            self.promote_if_due(integration, &policy, &mut state, now);
            match state.status {
                CircuitStatus::Healthy => return ProbeOutcome::Skipped,
                CircuitStatus::Panic => {
                    return ProbeOutcome::NotDue {
                        remaining_ms: elapsed_ms(now, state.probe_due_at(&policy)),
                    }
                }
                CircuitStatus::Recovering => {}
            }
        }

        let Some(probe) = self.probe.clone() else {
            warn!(integration = %integration, "recovery probe requested but no health probe configured");
            return ProbeOutcome::NoProbe;
        };

        let result = probe.check(integration).await;
        self.record_probe_result(integration, result)
    }

    /// Apply the result of a probe the host ran itself.
    pub fn record_probe_result(&self, integration: Integration, result: Result<(), String>) -> ProbeOutcome {
        let slot = &self.slots[integration.index()];
        let policy = slot.policy;
        let now = self.clock.now_ms();

        let mut state = slot.state.lock();
        self.promote_if_due(integration, &policy, &mut state, now);

        match state.status {
            CircuitStatus::Healthy => ProbeOutcome::Skipped,
            CircuitStatus::Panic => ProbeOutcome::NotDue {
                remaining_ms: elapsed_ms(now, state.probe_due_at(&policy)),
            },
            CircuitStatus::Recovering => match result {
                Ok(()) => {
                    let recovered = self.succeed_recovery(integration, &policy, &mut state, now);
                    ProbeOutcome::Succeeded {
                        consecutive: if recovered {
                            policy.required_successes
                        } else {
                            state.consecutive_successes
                        },
                        recovered,
                    }
                }
                Err(reason) => {
                    state.last_error = Some(reason.clone());
                    self.fail_recovery(integration, &mut state, &reason, now);
                    ProbeOutcome::Failed { reason }
                }
            },
        }
    }

    /// Status of one integration. Read-only.
    pub fn status(&self, integration: Integration) -> IntegrationStatus {
        let slot = &self.slots[integration.index()];
        let now = self.clock.now_ms();
        let state = slot.state.lock();
        Self::snapshot(integration, &slot.policy, &state, now)
    }

    /// Whether an integration is panicking or recovering.
    pub fn is_panicking(&self, integration: Integration) -> bool {
        self.slots[integration.index()].state.lock().status != CircuitStatus::Healthy
    }

    /// Integrations that are not healthy, i.e. candidates for probing.
    pub fn probe_targets(&self) -> Vec<Integration> {
        Integration::ALL
            .into_iter()
            .filter(|&i| self.is_panicking(i))
            .collect()
    }

    /// Status of every integration. Read-only.
    pub fn get_status_summary(&self) -> StatusSummary {
        let now = self.clock.now_ms();
        let integrations = Integration::ALL
            .into_iter()
            .map(|integration| {
                let slot = &self.slots[integration.index()];
                let state = slot.state.lock();
                Self::snapshot(integration, &slot.policy, &state, now)
            })
            .collect();
        StatusSummary { integrations }
    }

    fn snapshot(
        integration: Integration,
        policy: &BreakerPolicy,
        state: &IntegrationState,
        now: u128,
    ) -> IntegrationStatus {
        let status = state.effective_status(policy, now);
        let failure_count = match status {
            CircuitStatus::Healthy => state.failures_in_window(policy, now),
            CircuitStatus::Panic | CircuitStatus::Recovering => state.failures.len(),
        };
        let consecutive_successes = if state.status == CircuitStatus::Recovering {
            state.consecutive_successes
        } else {
            0
        };
        IntegrationStatus {
            integration,
            status,
            failure_count: to_u32(failure_count),
            panic_reason: state.panic_reason.clone(),
            time_in_panic_ms: state.panic_entered_ms.map(|t| elapsed_ms(t, now)),
            consecutive_successes,
            required_successes: policy.required_successes,
            manual: state.manual,
            last_error: state.last_error.clone(),
        }
    }

    fn promote_if_due(
        &self,
        integration: Integration,
        policy: &BreakerPolicy,
        state: &mut IntegrationState,
        now: u128,
    ) {
        if state.status == CircuitStatus::Panic && now >= state.probe_due_at(policy) {
            state.status = CircuitStatus::Recovering;
            state.consecutive_successes = 0;
            info!(integration = %integration, "probe interval elapsed, recovering");
            self.audit(integration, PanicAction::Recovering, None, now);
        }
    }

    fn enter_panic(
        &self,
        integration: Integration,
        state: &mut IntegrationState,
        reason: String,
        manual: bool,
        now: u128,
    ) {
        state.status = CircuitStatus::Panic;
        state.panic_entered_ms.get_or_insert(now);
        state.probe_anchor_ms = now;
        state.consecutive_successes = 0;
        state.manual = manual;
        state.panic_reason = Some(reason.clone());

        warn!(
            integration = %integration,
            manual,
            reason = %reason,
            "integration entering panic mode"
        );
        self.registry
            .set_panic_override(integration.capability(), format!("panic mode: {reason}"));
        let action = if manual {
            PanicAction::ManualPanic
        } else {
            PanicAction::AutoPanic
        };
        self.audit(integration, action, Some(reason), now);
    }

    fn exit_panic(
        &self,
        integration: Integration,
        state: &mut IntegrationState,
        action: PanicAction,
        reason: Option<String>,
        now: u128,
    ) {
        let panicked_for = state.panic_entered_ms.map(|t| elapsed_ms(t, now));
        *state = IntegrationState {
            last_error: state.last_error.take(),
            ..IntegrationState::new()
        };

        info!(
            integration = %integration,
            action = action.as_str(),
            panicked_for_ms = panicked_for.unwrap_or(0),
            reason = reason.as_deref().unwrap_or(""),
            "integration restored"
        );
        self.registry.clear_panic_override(integration.capability());
        self.audit(integration, action, reason, now);
    }

    /// Count a success while recovering. Returns whether the circuit closed.
    fn succeed_recovery(
        &self,
        integration: Integration,
        policy: &BreakerPolicy,
        state: &mut IntegrationState,
        now: u128,
    ) -> bool {
        state.consecutive_successes += 1;
        debug!(
            integration = %integration,
            consecutive = state.consecutive_successes,
            required = policy.required_successes,
            "recovery probe succeeded"
        );
        if state.consecutive_successes >= policy.required_successes {
            let reason = format!("{} consecutive successful probes", policy.required_successes);
            self.exit_panic(integration, state, PanicAction::Recovered, Some(reason), now);
            return true;
        }
        false
    }

    fn fail_recovery(&self, integration: Integration, state: &mut IntegrationState, error: &str, now: u128) {
        warn!(
            integration = %integration,
            after_successes = state.consecutive_successes,
            error = %error,
            "recovery probe failed, staying in panic"
        );
        state.status = CircuitStatus::Panic;
        state.consecutive_successes = 0;
        state.probe_anchor_ms = now;
        self.audit(integration, PanicAction::ProbeFailed, Some(error.to_string()), now);
    }

    fn audit(&self, integration: Integration, action: PanicAction, reason: Option<String>, now: u128) {
        if let Some(sink) = &self.audit {
            sink.record(build_audit_event(integration, action, reason, now));
        }
    }
}
