//! Background token validity check.
//!
//! While a session is authenticated a task calls
//! [`SessionManager::ensure_valid_token`] on a fixed period. Dropping the
//! [`RefreshTimer`] (or calling [`RefreshTimer::stop`]) ends the task after
//! its current tick.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::{SessionInner, SessionManager};

pub(crate) struct RefreshTimer {
    shutdown: watch::Sender<bool>,
}

impl RefreshTimer {
    /// Spawn the periodic check. The task holds a weak reference so it
    /// never keeps the session alive on its own.
    pub(crate) fn start(inner: Weak<SessionInner>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tracing::debug!(period_secs = period.as_secs(), "Token refresh timer started");
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        let manager = SessionManager { inner };
                        if !manager.session().is_authenticated {
                            break;
                        }
                        if !manager.ensure_valid_token().await {
                            tracing::info!("Session ended by background token check");
                            break;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Token refresh timer stopped");
        });

        Self { shutdown }
    }

    pub(crate) fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.shutdown.is_closed() && !*self.shutdown.borrow()
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
