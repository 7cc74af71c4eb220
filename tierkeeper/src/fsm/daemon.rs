//! Periodic queue scanner.
//!
//! Drives QUEUED → CHANGING transitions by calling
//! [`Fsm::process_queue`](super::Fsm::process_queue) on a fixed interval
//! until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Fsm, DEFAULT_PROCESS_INTERVAL_SECS};

/// Background task that dispatches queued migrations.
pub struct DispatcherDaemon {
    fsm: Arc<Fsm>,
    interval: Duration,
}

impl DispatcherDaemon {
    pub fn new(fsm: Arc<Fsm>) -> Self {
        Self {
            fsm,
            interval: Duration::from_secs(DEFAULT_PROCESS_INTERVAL_SECS),
        }
    }

    /// Sets a custom scan interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Scans the queue until `shutdown` is cancelled.
    ///
    /// Workers already dispatched keep running after shutdown and report
    /// their outcome as usual.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            max_workers = self.fsm.pool().capacity(),
            "Dispatcher daemon starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Dispatcher daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    // Settling requests touches the request store
                    let fsm = Arc::clone(&self.fsm);
                    match tokio::task::spawn_blocking(move || fsm.process_queue()).await {
                        Ok(dispatched) if dispatched > 0 => {
                            debug!(dispatched, "Queue scan dispatched workers");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Queue scan task failed"),
                    }
                }
            }
        }
    }
}
