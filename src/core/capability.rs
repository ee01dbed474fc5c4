//! Capability registry: named boolean toggles with layered overrides.
//!
//! A capability resolves in four layers: a panic override (held by the
//! panic controller while an integration is down), a runtime override set
//! by an operator, an environment override captured once at startup, and
//! the compiled default. Unknown paths resolve to `false` so callers fail
//! closed.
//!
//! The panic layer sits above operator overrides and never replaces them:
//! once panic mode ends the capability resolves to whatever it was before.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::ResilienceError;
use crate::util::clock::{elapsed_ms, now_ms, Clock, SystemClock};

/// Prefix shared by all capability environment variables.
pub const ENV_PREFIX: &str = "CAPABILITY_";

/// Suffix of the optional companion variable carrying the override timestamp.
pub const ENV_SET_AT_SUFFIX: &str = "_SET_AT";

/// Default age after which an override is reported as stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Grouping used for status reporting and environment variable names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    /// Third-party integrations (tax authority, messaging, payments, AI).
    External,
    /// Business features of the platform.
    Domain,
    /// Background services and workers.
    Services,
}

impl CapabilityCategory {
    /// All categories in reporting order.
    pub const ALL: [Self; 3] = [Self::External, Self::Domain, Self::Services];

    /// Lowercase name used in capability paths.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Domain => "domain",
            Self::Services => "services",
        }
    }
}

impl fmt::Display for CapabilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! capabilities {
    ($(
        $(#[$meta:meta])*
        $variant:ident => ($category:ident, $name:literal, $path:literal, $default:literal)
    ),+ $(,)?) => {
        /// Every toggle known to the platform.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Capability {
            $(
                $(#[$meta])*
                #[serde(rename = $path)]
                $variant,
            )+
        }

        impl Capability {
            /// All capabilities in reporting order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Category this capability belongs to.
            pub const fn category(self) -> CapabilityCategory {
                match self {
                    $(Self::$variant => CapabilityCategory::$category,)+
                }
            }

            /// Name within the category.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Dotted `category.name` path.
            pub const fn path(self) -> &'static str {
                match self {
                    $(Self::$variant => $path,)+
                }
            }

            /// Compiled-in default value.
            pub const fn default_value(self) -> bool {
                match self {
                    $(Self::$variant => $default,)+
                }
            }
        }
    };
}

capabilities! {
    /// Electronic invoicing through the tax authority web services.
    ExternalAfip => (External, "afip", "external.afip", true),
    /// WhatsApp Business messaging.
    ExternalWhatsapp => (External, "whatsapp", "external.whatsapp", true),
    /// MercadoPago payment links and webhooks.
    ExternalMercadopago => (External, "mercadopago", "external.mercadopago", true),
    /// Voice transcription and AI extraction.
    ExternalVoiceAi => (External, "voice_ai", "external.voice_ai", true),
    /// Mobile push notifications.
    ExternalPushNotifications => (External, "push_notifications", "external.push_notifications", true),
    /// Invoice issuing.
    DomainInvoicing => (Domain, "invoicing", "domain.invoicing", true),
    /// Payment collection.
    DomainPayments => (Domain, "payments", "domain.payments", true),
    /// Job scheduling.
    DomainScheduling => (Domain, "scheduling", "domain.scheduling", true),
    /// Automatic technician assignment.
    DomainJobAssignment => (Domain, "job_assignment", "domain.job_assignment", true),
    /// Offline sync for the mobile apps.
    DomainOfflineSync => (Domain, "offline_sync", "domain.offline_sync", true),
    /// Live technician location tracking.
    DomainTechnicianGps => (Domain, "technician_gps", "domain.technician_gps", true),
    /// Queue retrying invoice authorization codes.
    ServicesCaeQueue => (Services, "cae_queue", "services.cae_queue", true),
    /// Outbound WhatsApp message queue.
    ServicesWhatsappQueue => (Services, "whatsapp_queue", "services.whatsapp_queue", true),
    /// Nightly payment reconciliation.
    ServicesPaymentReconciliation => (Services, "payment_reconciliation", "services.payment_reconciliation", true),
    /// Per-tenant API rate limiting.
    ServicesRateLimiting => (Services, "rate_limiting", "services.rate_limiting", true),
    /// Fair multi-tenant job admission.
    ServicesFairScheduling => (Services, "fair_scheduling", "services.fair_scheduling", true),
}

impl Capability {
    /// Look up a capability by its dotted path.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.path() == path)
    }

    /// Environment variable overriding this capability, e.g. `CAPABILITY_EXTERNAL_AFIP`.
    pub fn env_var(self) -> String {
        format!(
            "{ENV_PREFIX}{}_{}",
            self.category().as_str().to_ascii_uppercase(),
            self.name().to_ascii_uppercase()
        )
    }

    fn from_env_var(var: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.env_var() == var)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for Capability {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_path(s.trim()).ok_or_else(|| ResilienceError::UnknownCapability(s.to_string()))
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    /// Compiled default.
    Default,
    /// Environment variable read at startup.
    Env,
    /// Forced off by panic mode.
    Panic,
    /// Runtime override set by an operator.
    Runtime,
    /// Path is not registered.
    NotFound,
}

impl CapabilitySource {
    /// Lowercase tag used in reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Env => "env",
            Self::Panic => "panic",
            Self::Runtime => "runtime",
            Self::NotFound => "not_found",
        }
    }
}

/// Override captured from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvOverride {
    /// Forced value.
    pub value: bool,
    /// Variable that supplied it.
    pub var: String,
    /// When the override was put in place (or first seen).
    pub detected_at_ms: u128,
}

/// Immutable snapshot of capability environment overrides.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    values: HashMap<Capability, EnvOverride>,
}

impl EnvOverrides {
    /// Snapshot with no overrides.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `.env` if present, then snapshot the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            debug!("no .env loaded: {e}");
        }
        Self::from_vars(std::env::vars(), now_ms())
    }

    /// Build a snapshot from explicit variable pairs.
    ///
    /// Variables outside the `CAPABILITY_` prefix are ignored. Unknown
    /// capabilities and unparseable values are skipped with a warning.
    pub fn from_vars<I, K, V>(vars: I, loaded_at_ms: u128) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.as_ref().starts_with(ENV_PREFIX))
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();

        let mut values = HashMap::new();
        for (var, raw) in &vars {
            if var.ends_with(ENV_SET_AT_SUFFIX) {
                continue;
            }
            let Some(capability) = Capability::from_env_var(var) else {
                warn!(var = %var, "ignoring override for unknown capability");
                continue;
            };
            let Some(value) = parse_bool(raw) else {
                warn!(var = %var, value = %raw, "ignoring capability override with invalid boolean");
                continue;
            };
            let detected_at_ms = vars
                .get(&format!("{var}{ENV_SET_AT_SUFFIX}"))
                .and_then(|ts| ts.trim().parse::<u128>().ok())
                .unwrap_or(loaded_at_ms);
            info!(capability = %capability, value, "capability overridden from environment");
            values.insert(
                capability,
                EnvOverride {
                    value,
                    var: var.clone(),
                    detected_at_ms,
                },
            );
        }
        Self { values }
    }

    /// Override for a capability, if any.
    pub fn get(&self, capability: Capability) -> Option<&EnvOverride> {
        self.values.get(&capability)
    }

    /// Number of overrides in the snapshot.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot holds no overrides.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Value forced at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeOverride {
    /// Forced value.
    pub value: bool,
    /// Why it was forced.
    pub reason: String,
    /// When it was set.
    pub set_at_ms: u128,
}

/// Resolved view of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityState {
    /// Dotted path as requested.
    pub path: String,
    /// Effective value.
    pub value: bool,
    /// Layer the value came from.
    pub source: CapabilitySource,
    /// Whether the active override is older than the stale threshold.
    pub is_stale: bool,
    /// Compiled default (`false` for unknown paths).
    pub default_value: bool,
    /// Reason attached to a panic or runtime override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Age of the active override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_age_ms: Option<u64>,
}

/// Capabilities of one category, resolved together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityGroup {
    /// Category shared by every entry.
    pub category: CapabilityCategory,
    /// Resolved capabilities in declaration order.
    pub capabilities: Vec<CapabilityState>,
}

/// Override flagged by the safety monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleOverride {
    /// Capability path.
    pub path: String,
    /// `env` or `runtime`; panic overrides are never reported.
    pub source: CapabilitySource,
    /// Value being forced.
    pub value: bool,
    /// Age of the override.
    pub age_ms: u64,
    /// Runtime override reason or the environment variable name.
    pub detail: String,
}

/// Process-wide table of capabilities.
#[derive(Debug)]
pub struct CapabilityRegistry {
    env: EnvOverrides,
    panic: RwLock<HashMap<Capability, RuntimeOverride>>,
    runtime: RwLock<HashMap<Capability, RuntimeOverride>>,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
}

impl CapabilityRegistry {
    /// Create a registry over an environment snapshot.
    pub fn new(env: EnvOverrides, stale_after: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            env,
            panic: RwLock::new(HashMap::new()),
            runtime: RwLock::new(HashMap::new()),
            stale_after,
            clock,
        }
    }

    /// Registry with compiled defaults only, on the system clock.
    pub fn with_defaults() -> Self {
        Self::new(EnvOverrides::empty(), DEFAULT_STALE_AFTER, Arc::new(SystemClock))
    }

    /// Resolve a capability by path. Unknown paths resolve to `false`.
    pub fn get(&self, path: &str) -> CapabilityState {
        match Capability::from_path(path) {
            Some(capability) => self.get_capability(capability),
            None => {
                warn!(path = %path, "unknown capability requested, failing closed");
                CapabilityState {
                    path: path.to_string(),
                    value: false,
                    source: CapabilitySource::NotFound,
                    is_stale: false,
                    default_value: false,
                    reason: None,
                    override_age_ms: None,
                }
            }
        }
    }

    /// Resolve a known capability.
    pub fn get_capability(&self, capability: Capability) -> CapabilityState {
        let now = self.clock.now_ms();
        let panic = self.panic.read().get(&capability).cloned();
        let runtime = self.runtime.read().get(&capability).cloned();
        self.resolve(capability, panic, runtime, now)
    }

    /// Effective value of a known capability.
    pub fn is_enabled(&self, capability: Capability) -> bool {
        if self.panic.read().contains_key(&capability) {
            return false;
        }
        if let Some(forced) = self.runtime.read().get(&capability) {
            return forced.value;
        }
        self.env
            .get(capability)
            .map_or_else(|| capability.default_value(), |o| o.value)
    }

    /// Every capability grouped by category.
    ///
    /// Groups are resolved lazily as the iterator advances; clone the
    /// iterator (or call again) to walk the table a second time.
    pub fn list_all(&self) -> CapabilityGroups<'_> {
        CapabilityGroups {
            registry: self,
            next: 0,
        }
    }

    /// Force a capability to `value` until cleared.
    ///
    /// While the capability is held off by panic mode the override is
    /// stored but does not take effect until the panic override is lifted.
    pub fn set_runtime_override(&self, capability: Capability, value: bool, reason: impl Into<String>) {
        let reason = reason.into();
        info!(capability = %capability, value, reason = %reason, "runtime override set");
        self.runtime.write().insert(
            capability,
            RuntimeOverride {
                value,
                reason,
                set_at_ms: self.clock.now_ms(),
            },
        );
    }

    /// Remove a runtime override, restoring env/default resolution.
    ///
    /// Does not touch the panic layer.
    pub fn clear_runtime_override(&self, capability: Capability) -> Option<RuntimeOverride> {
        let removed = self.runtime.write().remove(&capability);
        if removed.is_some() {
            info!(capability = %capability, "runtime override cleared");
        }
        removed
    }

    /// Current runtime override, if any.
    pub fn runtime_override(&self, capability: Capability) -> Option<RuntimeOverride> {
        self.runtime.read().get(&capability).cloned()
    }

    /// Hold a capability off for panic mode. Operator overrides stay in place underneath.
    pub fn set_panic_override(&self, capability: Capability, reason: impl Into<String>) {
        let reason = reason.into();
        info!(capability = %capability, reason = %reason, "panic override set");
        self.panic.write().insert(
            capability,
            RuntimeOverride {
                value: false,
                reason,
                set_at_ms: self.clock.now_ms(),
            },
        );
    }

    /// Lift the panic override; the capability resolves as it did before panic.
    pub fn clear_panic_override(&self, capability: Capability) -> Option<RuntimeOverride> {
        let removed = self.panic.write().remove(&capability);
        if removed.is_some() {
            info!(capability = %capability, "panic override cleared");
        }
        removed
    }

    /// Current panic override, if any.
    pub fn panic_override(&self, capability: Capability) -> Option<RuntimeOverride> {
        self.panic.read().get(&capability).cloned()
    }

    /// Environment snapshot the registry was built from.
    pub const fn env_overrides(&self) -> &EnvOverrides {
        &self.env
    }

    /// Recompute staleness of every env and runtime override and warn about stale ones.
    ///
    /// Stale overrides are reported, never cleared. Panic overrides end with
    /// the panic and are not checked.
    pub fn safety_check(&self) -> Vec<StaleOverride> {
        let now = self.clock.now_ms();
        let runtime = self.runtime.read().clone();
        let mut stale = Vec::new();

        for &capability in Capability::ALL {
            if let Some(forced) = runtime.get(&capability) {
                let age_ms = elapsed_ms(forced.set_at_ms, now);
                if self.is_stale_age(age_ms) {
                    stale.push(StaleOverride {
                        path: capability.path().to_string(),
                        source: CapabilitySource::Runtime,
                        value: forced.value,
                        age_ms,
                        detail: forced.reason.clone(),
                    });
                }
            }
            if let Some(env) = self.env.get(capability) {
                let age_ms = elapsed_ms(env.detected_at_ms, now);
                if self.is_stale_age(age_ms) {
                    stale.push(StaleOverride {
                        path: capability.path().to_string(),
                        source: CapabilitySource::Env,
                        value: env.value,
                        age_ms,
                        detail: env.var.clone(),
                    });
                }
            }
        }

        for entry in &stale {
            warn!(
                capability = %entry.path,
                source = entry.source.as_str(),
                age_hours = entry.age_ms / 3_600_000,
                "capability override is stale; review and clear it"
            );
        }
        stale
    }

    fn is_stale_age(&self, age_ms: u64) -> bool {
        u128::from(age_ms) > self.stale_after.as_millis()
    }

    fn resolve(
        &self,
        capability: Capability,
        panic: Option<RuntimeOverride>,
        runtime: Option<RuntimeOverride>,
        now: u128,
    ) -> CapabilityState {
        let default_value = capability.default_value();
        let path = capability.path().to_string();

        if let Some(forced) = panic {
            return CapabilityState {
                path,
                value: forced.value,
                source: CapabilitySource::Panic,
                is_stale: false,
                default_value,
                reason: Some(forced.reason),
                override_age_ms: Some(elapsed_ms(forced.set_at_ms, now)),
            };
        }

        if let Some(forced) = runtime {
            let age_ms = elapsed_ms(forced.set_at_ms, now);
            return CapabilityState {
                path,
                value: forced.value,
                source: CapabilitySource::Runtime,
                is_stale: self.is_stale_age(age_ms),
                default_value,
                reason: Some(forced.reason),
                override_age_ms: Some(age_ms),
            };
        }

        if let Some(env) = self.env.get(capability) {
            let age_ms = elapsed_ms(env.detected_at_ms, now);
            return CapabilityState {
                path,
                value: env.value,
                source: CapabilitySource::Env,
                is_stale: self.is_stale_age(age_ms),
                default_value,
                reason: None,
                override_age_ms: Some(age_ms),
            };
        }

        CapabilityState {
            path,
            value: default_value,
            source: CapabilitySource::Default,
            is_stale: false,
            default_value,
            reason: None,
            override_age_ms: None,
        }
    }
}

/// Lazy iterator over capability groups. See [`CapabilityRegistry::list_all`].
#[derive(Debug, Clone)]
pub struct CapabilityGroups<'a> {
    registry: &'a CapabilityRegistry,
    next: usize,
}

impl Iterator for CapabilityGroups<'_> {
    type Item = CapabilityGroup;

    fn next(&mut self) -> Option<Self::Item> {
        let category = *CapabilityCategory::ALL.get(self.next)?;
        self.next += 1;

        let now = self.registry.clock.now_ms();
        let panic = self.registry.panic.read().clone();
        let runtime = self.registry.runtime.read().clone();
        let capabilities = Capability::ALL
            .iter()
            .copied()
            .filter(|c| c.category() == category)
            .map(|c| {
                self.registry
                    .resolve(c, panic.get(&c).cloned(), runtime.get(&c).cloned(), now)
            })
            .collect();

        Some(CapabilityGroup {
            category,
            capabilities,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = CapabilityCategory::ALL.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CapabilityGroups<'_> {}
