//! Fair multi-tenant admission control over a shared job capacity pool.
//!
//! The scheduler never holds jobs itself. Queue workers ask [`FairScheduler::admit`]
//! before dequeuing a job for an organization and report back when the job
//! completes or fails. A rejection is the backpressure signal: leave the job
//! queued and ask again later.
//!
//! Global capacity is a lock-free `AtomicU32` reserved with a CAS loop, so
//! admission can never push it past the ceiling. Only
//! [`FairScheduler::record_start`] can. Each organization's counters sit
//! behind their own mutex, held across check and reservation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::util::clock::Clock;

/// Capacity ceilings and smoothing for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerLimits {
    /// Maximum active jobs across all organizations.
    pub global_max_active: u32,
    /// Maximum active jobs for a single organization.
    pub per_org_max_active: u32,
    /// Largest share one organization may hold, in percent of the configured
    /// `global_max_active`. The share is not measured against the jobs
    /// currently active, so an org alone on an idle pool is still capped.
    pub max_org_share_percent: u8,
    /// Weight of the newest sample in the wait-time moving average.
    pub wait_time_alpha: f64,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            global_max_active: 100,
            per_org_max_active: 10,
            max_org_share_percent: 50,
            wait_time_alpha: 0.2,
        }
    }
}

impl SchedulerLimits {
    /// Active jobs one organization may hold under the share cap:
    /// `ceil(global_max_active * max_org_share_percent / 100)`.
    ///
    /// Fixed by the configured ceiling. With the defaults this is 50, above
    /// the per-org ceiling of 10, so the per-org ceiling binds first.
    pub fn org_share_limit(&self) -> u32 {
        let scaled = u64::from(self.global_max_active) * u64::from(self.max_org_share_percent);
        u32::try_from(scaled.div_ceil(100)).unwrap_or(u32::MAX)
    }
}

/// Why an admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionRejection {
    /// Global active-job ceiling reached.
    GlobalCeiling,
    /// Organization's active-job ceiling reached.
    OrgCeiling,
    /// Organization would exceed its share of global capacity.
    OrgShareCap,
}

impl fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GlobalCeiling => "global ceiling",
            Self::OrgCeiling => "org ceiling",
            Self::OrgShareCap => "org share cap",
        })
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// Whether the job may start.
    pub allowed: bool,
    /// First failing check when refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AdmissionRejection>,
}

impl Admission {
    const fn granted() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    const fn rejected(reason: AdmissionRejection) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    /// Whether the job may start.
    pub const fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Counters for one organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrgQueueStats {
    /// Jobs currently running.
    pub active: u32,
    /// Jobs completed successfully.
    pub completed: u64,
    /// Jobs that failed.
    pub failed: u64,
    /// Exponential moving average of queue wait time.
    pub avg_wait_ms: f64,
    /// Last admit/complete/fail timestamp.
    pub last_activity_ms: u128,
}

/// Scheduler-wide snapshot for dashboards and status tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerMetrics {
    /// Active jobs across all organizations.
    pub global_active: u32,
    /// Configured global ceiling.
    pub global_max_active: u32,
    /// Organizations with at least one active job.
    pub active_orgs: usize,
    /// Completion-weighted mean of per-organization wait averages.
    pub average_wait_ms: f64,
    /// Per-organization counters keyed by organization id.
    pub orgs: BTreeMap<String, OrgQueueStats>,
}

impl SchedulerMetrics {
    /// Whether the global ceiling is fully used.
    pub const fn at_capacity(&self) -> bool {
        self.global_active >= self.global_max_active
    }
}

/// Admission controller for a shared capacity pool.
#[derive(Debug)]
pub struct FairScheduler {
    limits: SchedulerLimits,
    /// Lock-free global capacity tracking.
    global_active: AtomicU32,
    orgs: RwLock<HashMap<String, Mutex<OrgQueueStats>>>,
    clock: Arc<dyn Clock>,
}

impl FairScheduler {
    /// Create a scheduler with the given limits.
    pub fn new(limits: SchedulerLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            global_active: AtomicU32::new(0),
            orgs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Limits in force.
    pub const fn limits(&self) -> &SchedulerLimits {
        &self.limits
    }

    /// Decide whether `org_id` may start a job from `queue_name` now.
    ///
    /// Checks the global ceiling, the org ceiling, then the org share cap.
    /// On success one slot is reserved for the org; release it with
    /// [`Self::record_complete`] or [`Self::record_fail`].
    pub fn admit(&self, org_id: &str, queue_name: &str) -> Admission {
        let now = self.clock.now_ms();
        let admission = self.with_org(org_id, |stats| {
            let global = self.global_active.load(Ordering::Acquire);
            if global >= self.limits.global_max_active {
                return Admission::rejected(AdmissionRejection::GlobalCeiling);
            }
            if stats.active >= self.limits.per_org_max_active {
                return Admission::rejected(AdmissionRejection::OrgCeiling);
            }
            if stats.active + 1 > self.limits.org_share_limit() {
                return Admission::rejected(AdmissionRejection::OrgShareCap);
            }
            if !self.try_reserve_global() {
                return Admission::rejected(AdmissionRejection::GlobalCeiling);
            }
            stats.active += 1;
            stats.last_activity_ms = now;
            Admission::granted()
        });

        match admission.reason {
            None => debug!(org = %org_id, queue = %queue_name, "job admitted"),
            Some(reason) => debug!(org = %org_id, queue = %queue_name, %reason, "job admission deferred"),
        }
        admission
    }

    /// Count a job that started without going through [`Self::admit`].
    ///
    /// Ceilings are not enforced; this keeps the counters honest for jobs
    /// the queue host resumed on its own. The global count may end up above
    /// `global_max_active`, in which case admission stays closed until enough
    /// jobs complete.
    ///
    /// Never call this for a job [`Self::admit`] accepted: admission already
    /// reserved its slot, so the job would be counted twice.
    pub fn record_start(&self, org_id: &str) {
        let now = self.clock.now_ms();
        let global = self.with_org(org_id, |stats| {
            stats.active += 1;
            stats.last_activity_ms = now;
            self.global_active.fetch_add(1, Ordering::AcqRel).saturating_add(1)
        });
        if global > self.limits.global_max_active {
            warn!(
                org = %org_id,
                global_active = global,
                global_max_active = self.limits.global_max_active,
                "job start recorded past the global ceiling"
            );
        } else {
            debug!(org = %org_id, "job start recorded outside admission");
        }
    }

    /// Release a slot and fold `wait_time_ms` into the org's wait average.
    pub fn record_complete(&self, org_id: &str, wait_time_ms: u64) {
        let now = self.clock.now_ms();
        let alpha = self.limits.wait_time_alpha;
        self.with_org(org_id, |stats| {
            self.release_slot(org_id, stats);
            #[allow(clippy::cast_precision_loss)]
            let sample = wait_time_ms as f64;
            stats.avg_wait_ms = if stats.completed == 0 {
                sample
            } else {
                alpha.mul_add(sample, (1.0 - alpha) * stats.avg_wait_ms)
            };
            stats.completed += 1;
            stats.last_activity_ms = now;
        });
    }

    /// Release a slot and count a failure.
    pub fn record_fail(&self, org_id: &str) {
        let now = self.clock.now_ms();
        self.with_org(org_id, |stats| {
            self.release_slot(org_id, stats);
            stats.failed += 1;
            stats.last_activity_ms = now;
        });
    }

    /// Counters for one organization, if it has been seen.
    pub fn org_stats(&self, org_id: &str) -> Option<OrgQueueStats> {
        self.orgs.read().get(org_id).map(|s| s.lock().clone())
    }

    /// Scheduler-wide snapshot. Read-only.
    pub fn get_metrics(&self) -> SchedulerMetrics {
        let orgs: BTreeMap<String, OrgQueueStats> = self
            .orgs
            .read()
            .iter()
            .map(|(id, stats)| (id.clone(), stats.lock().clone()))
            .collect();

        let active_orgs = orgs.values().filter(|s| s.active > 0).count();
        let (weighted, samples) = orgs.values().fold((0.0_f64, 0_u64), |(sum, n), s| {
            #[allow(clippy::cast_precision_loss)]
            let completed = s.completed as f64;
            (completed.mul_add(s.avg_wait_ms, sum), n + s.completed)
        });
        #[allow(clippy::cast_precision_loss)]
        let average_wait_ms = if samples == 0 {
            0.0
        } else {
            weighted / samples as f64
        };

        SchedulerMetrics {
            global_active: self.global_active.load(Ordering::Acquire),
            global_max_active: self.limits.global_max_active,
            active_orgs,
            average_wait_ms,
            orgs,
        }
    }

    /// Forget an organization's counters. Refused while it has active jobs.
    pub fn reset_org(&self, org_id: &str) -> bool {
        let mut orgs = self.orgs.write();
        match orgs.get(org_id).map(|s| s.lock().active) {
            None => false,
            Some(0) => {
                orgs.remove(org_id);
                info!(org = %org_id, "org queue stats reset");
                true
            }
            Some(active) => {
                warn!(org = %org_id, active, "refusing to reset org with active jobs");
                false
            }
        }
    }

    /// Drop counters of every organization with no active jobs.
    pub fn prune_idle(&self) -> usize {
        let mut orgs = self.orgs.write();
        let before = orgs.len();
        orgs.retain(|_, stats| stats.get_mut().active > 0);
        let removed = before - orgs.len();
        if removed > 0 {
            info!(removed, "pruned idle org queue stats");
        }
        removed
    }

    /// Run `f` on the org's counters, creating them on first use.
    ///
    /// The map stays read-locked while `f` runs so that resets cannot remove
    /// an entry mid-update.
    fn with_org<R>(&self, org_id: &str, f: impl FnOnce(&mut OrgQueueStats) -> R) -> R {
        {
            let orgs = self.orgs.read();
            if let Some(stats) = orgs.get(org_id) {
                let mut guard = stats.lock();
                return f(&mut *guard);
            }
        }
        let mut orgs = self.orgs.write();
        let stats = orgs
            .entry(org_id.to_string())
            .or_insert_with(|| Mutex::new(OrgQueueStats::default()));
        f(stats.get_mut())
    }

    /// Try to reserve one global slot atomically using a CAS loop.
    fn try_reserve_global(&self) -> bool {
        let mut current = self.global_active.load(Ordering::Acquire);
        loop {
            if current >= self.limits.global_max_active {
                return false;
            }
            match self.global_active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release_slot(&self, org_id: &str, stats: &mut OrgQueueStats) {
        if stats.active == 0 {
            warn!(org = %org_id, "job finished with no active job recorded");
            return;
        }
        stats.active -= 1;
        let _ = self
            .global_active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}
