use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::coordinator::{RunCoordinator, RunOutcome};

/// Trigger a check every `every`, alongside the HTTP trigger.
///
/// Shares the coordinator's single-flight gate, so a tick that lands on a
/// running check is dropped rather than stacked.
pub fn spawn_interval(coordinator: Arc<RunCoordinator>, every: Duration) -> JoinHandle<()> {
    info!(every_mins = every.as_secs() / 60, "⏰ in-process check interval enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match coordinator.trigger().await {
                Ok(report) if report.outcome == RunOutcome::AlreadyRunning => {
                    info!("scheduled tick skipped, check already running");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(stage = %e.stage, "scheduled check failed, retrying next tick");
                }
            }
        }
    })
}
