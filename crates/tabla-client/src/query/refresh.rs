//! Background re-validation of mounted queries and the periodic GC sweep.

use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::QueryCache;

/// Handle to the auto-refresh task. Dropping it stops the task.
pub struct AutoRefresh {
    shutdown: watch::Sender<bool>,
}

impl AutoRefresh {
    /// Spawn the task for `cache`.
    ///
    /// On every tick of `refetch_interval` all mounted queries are
    /// refetched and idle entries are swept. A zero interval disables the
    /// periodic refetch; the sweep then runs once per GC window. Focus and
    /// reconnect events refetch only stale mounted queries.
    pub fn start(cache: &QueryCache) -> Self {
        let refetch_interval = cache.config().refetch_interval;
        let period = if refetch_interval.is_zero() {
            cache.config().gc_time.max(Duration::from_secs(1))
        } else {
            refetch_interval
        };
        let refetch = !refetch_interval.is_zero();

        let weak = cache.downgrade();
        let mut events = cache.subscribe_lifecycle();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tracing::debug!(period_secs = period.as_secs(), refetch, "Query auto-refresh started");
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(cache) = QueryCache::upgrade(&weak) else {
                            break;
                        };
                        if refetch {
                            let count = cache.refetch_mounted(false).await;
                            tracing::debug!(count, "Periodic refetch of mounted queries");
                        }
                        cache.gc();
                    }
                    event = events.recv() => {
                        match event {
                            Ok(event) => {
                                let Some(cache) = QueryCache::upgrade(&weak) else {
                                    break;
                                };
                                let count = cache.refetch_mounted(true).await;
                                tracing::debug!(?event, count, "Refetched stale queries");
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "Auto-refresh missed lifecycle events");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Query auto-refresh stopped");
        });

        Self { shutdown }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_closed() && !*self.shutdown.borrow()
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.stop();
    }
}
