//! Tokio driver that runs recovery probes on a fixed tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::core::{Integration, PanicController, ProbeOutcome};

/// Probe every integration that is not healthy, once.
pub async fn probe_once(controller: &PanicController) -> Vec<(Integration, ProbeOutcome)> {
    let mut outcomes = Vec::new();
    for integration in controller.probe_targets() {
        let outcome = controller.run_probe(integration).await;
        debug!(integration = %integration, ?outcome, "probe tick");
        outcomes.push((integration, outcome));
    }
    outcomes
}

/// Background task probing panicking integrations.
#[derive(Debug)]
pub struct ProbeDriver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProbeDriver {
    /// Spawn on the current tokio runtime.
    pub fn spawn(controller: Arc<PanicController>, tick: Duration) -> Self {
        Self::spawn_on(&tokio::runtime::Handle::current(), controller, tick)
    }

    /// Spawn on a specific runtime.
    pub fn spawn_on(
        handle: &tokio::runtime::Handle,
        controller: Arc<PanicController>,
        tick: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let tick = tick.max(Duration::from_millis(1));

        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(tick_ms = tick.as_millis(), "probe driver started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        probe_once(&controller).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("probe driver stopped");
        });

        Self { shutdown, task }
    }

    /// Stop the driver and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
