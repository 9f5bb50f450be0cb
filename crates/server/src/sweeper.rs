//! Periodic background sweep.
//!
//! The only path by which approved tasks make progress without someone
//! calling `run`. One sweep at a time; a slow sweep delays the next tick
//! instead of overlapping it.

use std::sync::Arc;
use std::time::Duration;

use conductor_agent::runtime::Orchestrator;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            event_name = "system.sweeper.start",
            correlation_id = "sweep",
            period_secs = period.as_secs_f64(),
            "background sweep started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = orchestrator.sweep().await {
                        error!(
                            event_name = "system.sweeper.failed",
                            correlation_id = "sweep",
                            error_class = error.error_class(),
                            error = %error,
                            "sweep could not list tasks"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "system.sweeper.stopped", correlation_id = "shutdown", "background sweep stopped");
    })
}
