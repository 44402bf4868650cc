//! Background expiry sweep for [`LruCache`].
//!
//! Complements the lazy expiration done on reads and on `set`: entries nobody
//! reads again are still released on a fixed interval. Each sweep takes the
//! cache lock once and removes whole entries, so cancelling between ticks
//! never leaves a torn entry behind.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::CacheValue;
use super::lru::LruCache;

/// Shortest interval between sweeps; shorter requests are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Ask the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Token observed by the task; cancelling it stops the sweeper.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Cache sweeper task ended abnormally");
        }
    }
}

/// Spawn a task that calls [`LruCache::cleanup_expired`] every `every`,
/// but no more often than [`MIN_SWEEP_INTERVAL`].
///
/// Must be called from within a tokio runtime.
pub fn spawn_expiry_sweeper<V: CacheValue>(
    cache: Arc<LruCache<V>>,
    every: Duration,
) -> SweeperHandle {
    let every = every.max(MIN_SWEEP_INTERVAL);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_sweep_loop(cache, every, cancel.clone()));
    SweeperHandle { cancel, task }
}

async fn run_sweep_loop<V: CacheValue>(
    cache: Arc<LruCache<V>>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing can have expired yet.
    ticker.tick().await;

    info!(interval_ms = every.as_millis() as u64, "Cache sweeper started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Cache sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "Cache sweep removed expired entries");
                }
            }
        }
    }
}
