//! Runs the abandonment sweep on a fixed interval.
//!
//! The schedule belongs to the deployment, not to any stream: it keeps
//! ticking whether or not traffic is flowing.

use std::time::Duration;

use tether_store::CoordinationStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SweepConfig;
use crate::sweeper::AbandonmentSweeper;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running sweep task.
#[derive(Debug)]
pub struct SweepHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stops the schedule, interrupting a sweep or a blocked report in
    /// progress, and waits for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "sweep task did not exit cleanly");
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns the recurring sweep on the current tokio runtime.
///
/// The first sweep runs immediately. A sweep that overruns the interval
/// delays the next one rather than queueing extra runs. Failed sweeps are
/// logged and retried at the next tick. When `reports` is given, every
/// non-empty list of abandoned stream IDs is sent to it; a full channel holds
/// the schedule back until it drains or the sweep is shut down.
#[must_use = "dropping the handle leaves the sweep running with no way to stop it"]
pub fn spawn_sweeper<S: CoordinationStore>(
    sweeper: AbandonmentSweeper<S>,
    config: SweepConfig,
    reports: Option<mpsc::Sender<Vec<String>>>,
) -> SweepHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(sweeper, config, reports, cancel.clone()));

    SweepHandle { cancel, task }
}

async fn run<S: CoordinationStore>(
    sweeper: AbandonmentSweeper<S>,
    config: SweepConfig,
    reports: Option<mpsc::Sender<Vec<String>>>,
    cancel: CancellationToken,
) {
    let options = config.cleanup_options();
    let mut ticker = tokio::time::interval(config.interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval = ?config.interval, "abandonment sweep scheduled");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            () = cancel.cancelled() => break,
            result = sweeper.cleanup(&options) => result,
        };

        match result {
            Ok(abandoned) if abandoned.is_empty() => {}
            Ok(abandoned) => {
                if let Some(reports) = &reports {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        sent = reports.send(abandoned) => {
                            if sent.is_err() {
                                debug!("sweep report receiver dropped");
                            }
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "abandonment sweep failed"),
        }
    }

    info!("abandonment sweep stopped");
}
