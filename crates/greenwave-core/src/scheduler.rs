//! The single timer driving claim and lockdown expiry.

use std::sync::Arc;
use std::time::Duration;

use greenwave_authority::AuthorityStore;
use greenwave_ir::types::Timestamp;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::lockdown::LockdownManager;

/// What one tick expired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub claims: usize,
    pub lockdowns: usize,
}

pub struct ExpiryScheduler {
    store: Arc<AuthorityStore>,
    lockdowns: Arc<LockdownManager>,
    tick: Duration,
}

impl ExpiryScheduler {
    pub fn new(store: Arc<AuthorityStore>, lockdowns: Arc<LockdownManager>, tick: Duration) -> Self {
        Self {
            store,
            lockdowns,
            tick,
        }
    }

    /// Expire claims first, then end lockdowns, so a lockdown's own claims
    /// are already gone when its record closes.
    pub fn tick(&self, now: Timestamp) -> TickReport {
        let claims = self.store.expire_due(now).len();
        let lockdowns = self.lockdowns.expire_due(now).len();
        if claims > 0 || lockdowns > 0 {
            debug!(claims, lockdowns, %now, "expiry tick");
        }
        TickReport { claims, lockdowns }
    }

    /// Time until the next deadline, capped at the tick interval.
    pub fn next_wait(&self, now: Timestamp) -> Duration {
        [self.store.next_deadline(), self.lockdowns.next_deadline()]
            .into_iter()
            .flatten()
            .min()
            .map(|at| Duration::from_millis(at.0.saturating_sub(now.0)))
            .map_or(self.tick, |wait| wait.min(self.tick))
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "expiry scheduler started");
        while !*shutdown.borrow() {
            let now = self.store.clock().now();
            self.tick(now);
            let wait = self.next_wait(now);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("expiry scheduler stopped");
    }
}
