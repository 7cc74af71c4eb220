//! Expired request reaper.
//!
//! Prepared selections and finished migration requests are kept for their
//! retention window so clients can still poll and download them. Afterwards
//! the [`TidierDaemon`] deletes them. Requests that are still being worked
//! on survive their expiry for a further grace period, after which they are
//! considered abandoned and removed as well.
//!
//! # Example
//!
//! ```ignore
//! use tierkeeper::tidier::TidierDaemon;
//!
//! let daemon = TidierDaemon::new(store).with_interval(Duration::from_secs(3600));
//! tokio::spawn(daemon.run(shutdown_token));
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::persistence::{RequestStore, StoreError};

/// Default interval between tidier passes (1 hour).
pub const DEFAULT_TIDY_INTERVAL_SECS: u64 = 3600;

/// Default grace after expiry before an unfinished request is dropped (7 days).
pub const DEFAULT_STALE_GRACE_DAYS: i64 = 7;

/// Removes expired requests and returns how many were removed.
///
/// Finished requests go as soon as they expire. Unfinished ones are kept
/// until `stale_after` has passed since their expiry, so that recovery does
/// not replay them forever.
pub fn reap_expired(
    store: &dyn RequestStore,
    now: DateTime<Utc>,
    stale_after: chrono::Duration,
) -> Result<usize, StoreError> {
    let mut reaped = 0;
    for request in store.all()? {
        if !request.is_expired(now) {
            continue;
        }
        if request.is_finished() {
            if store.remove(&request.prepared_id)? {
                debug!(prepared_id = %request.prepared_id, expires = %request.expires, "Expired request removed");
                reaped += 1;
            }
        } else if request.expires + stale_after < now && store.remove(&request.prepared_id)? {
            warn!(
                prepared_id = %request.prepared_id,
                status = %request.status,
                expires = %request.expires,
                "Abandoned unfinished request removed"
            );
            reaped += 1;
        }
    }
    Ok(reaped)
}

fn tidy_store(store: &dyn RequestStore, stale_after: chrono::Duration) -> usize {
    match reap_expired(store, Utc::now(), stale_after) {
        Ok(reaped) => reaped,
        Err(e) => {
            error!(error = %e, "Tidier pass failed");
            0
        }
    }
}

/// Background daemon that periodically reaps expired requests.
pub struct TidierDaemon {
    store: Arc<dyn RequestStore>,
    interval: Duration,
    stale_after: chrono::Duration,
}

impl TidierDaemon {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(DEFAULT_TIDY_INTERVAL_SECS),
            stale_after: chrono::Duration::days(DEFAULT_STALE_GRACE_DAYS),
        }
    }

    /// Sets a custom interval between passes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Sets how long an unfinished request outlives its expiry.
    pub fn with_stale_grace(mut self, grace: chrono::Duration) -> Self {
        self.stale_after = grace.max(chrono::Duration::zero());
        self
    }

    /// Runs one pass.
    pub fn tidy(&self) -> usize {
        tidy_store(self.store.as_ref(), self.stale_after)
    }

    /// Runs the tidier until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Tidier daemon starting");

        let mut interval = tokio::time::interval(self.interval);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Tidier daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    // Reading every request document is blocking I/O
                    let store = Arc::clone(&self.store);
                    let stale_after = self.stale_after;
                    let reaped = tokio::task::spawn_blocking(move || {
                        tidy_store(store.as_ref(), stale_after)
                    })
                    .await
                    .unwrap_or_default();
                    if reaped > 0 {
                        info!(reaped, "Expired requests removed");
                    }
                }
            }
        }
    }
}
