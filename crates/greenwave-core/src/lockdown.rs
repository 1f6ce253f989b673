//! Operator-initiated corridor closures.
//!
//! A lockdown claims every signal on the road route between two points for
//! a fixed duration. Routing failures abort the request; a lockdown is never
//! built on a guessed corridor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use greenwave_authority::{AuthorityError, AuthorityStore, ClaimOutcome, ExpiryQueue};
use greenwave_corridor::{CorridorDetector, DetectError};
use greenwave_ir::types::{
    Claim, EndReason, Lockdown, LockdownId, LockdownState, Position, SignalId, Timestamp,
};
use tracing::{debug, info, warn};

use crate::route::{RouteError, RouteProvider};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LockdownError {
    #[error("Lockdown route unavailable: {0}")]
    RouteUnavailable(#[from] RouteError),

    #[error("Lockdown route invalid: {0}")]
    RouteInvalid(#[from] DetectError),

    #[error("Lockdown not found: {0}")]
    NotFound(LockdownId),

    #[error("Lockdown duration must be at least one minute")]
    InvalidDuration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockdownCreated {
    pub lockdown: Lockdown,
    /// Per-signal result of the lockdown's claims, in route order.
    pub outcomes: Vec<(SignalId, Result<ClaimOutcome, AuthorityError>)>,
}

pub struct LockdownManager {
    store: Arc<AuthorityStore>,
    detector: CorridorDetector,
    routes: Arc<dyn RouteProvider>,
    threshold_meters: f64,
    lockdowns: Mutex<BTreeMap<LockdownId, Lockdown>>,
    expiry: Mutex<ExpiryQueue<LockdownId>>,
    next_id: AtomicU64,
}

impl LockdownManager {
    pub fn new(
        store: Arc<AuthorityStore>,
        routes: Arc<dyn RouteProvider>,
        threshold_meters: f64,
    ) -> Self {
        Self {
            detector: CorridorDetector::new(store.registry().clone()),
            store,
            routes,
            threshold_meters,
            lockdowns: Mutex::new(BTreeMap::new()),
            expiry: Mutex::new(ExpiryQueue::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Lock down the corridor from `point_a` to `point_b`.
    pub async fn create(
        &self,
        point_a: Position,
        point_b: Position,
        duration_minutes: u64,
    ) -> Result<LockdownCreated, LockdownError> {
        if duration_minutes == 0 {
            return Err(LockdownError::InvalidDuration);
        }

        let route = self.routes.route(point_a, point_b).await.map_err(|e| {
            warn!(error = %e, "lockdown aborted, no route");
            e
        })?;
        let detected = self.detector.detect(&route, self.threshold_meters)?;

        let id = format!("lockdown-{:04}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let created_at = self.store.clock().now();
        let expires_at = created_at.plus_minutes(duration_minutes);

        let outcomes: Vec<_> = detected
            .iter()
            .map(|d| {
                let claim = Claim::lockdown(id.as_str(), created_at, expires_at);
                (d.signal_id.clone(), self.store.request_claim(&d.signal_id, claim))
            })
            .collect();

        let lockdown = Lockdown {
            id: id.clone(),
            point_a,
            point_b,
            route,
            created_at,
            expires_at,
            affected_signal_ids: detected.into_iter().map(|d| d.signal_id).collect(),
            state: LockdownState::Active,
        };

        self.lock_records().insert(id.clone(), lockdown.clone());
        lock(&self.expiry).schedule(id.clone(), expires_at);

        let held = outcomes
            .iter()
            .filter(|(_, r)| r.as_ref().is_ok_and(ClaimOutcome::is_granted))
            .count();
        info!(
            lockdown_id = %id,
            signals = lockdown.affected_signal_ids.len(),
            held,
            %expires_at,
            "lockdown created"
        );

        Ok(LockdownCreated { lockdown, outcomes })
    }

    /// End a lockdown now. Ending one that already ended changes nothing.
    pub fn release(&self, lockdown_id: &str) -> Result<Lockdown, LockdownError> {
        let now = self.store.clock().now();
        let lockdown = self.end(lockdown_id, EndReason::Released, now)?;
        lock(&self.expiry).cancel(&lockdown.id);
        Ok(lockdown)
    }

    /// End every lockdown whose deadline is at or before `now`.
    pub fn expire_due(&self, now: Timestamp) -> Vec<LockdownId> {
        let due = lock(&self.expiry).pop_due(now);
        due.into_iter()
            .filter_map(|entry| {
                self.end(&entry.key, EndReason::Expired, now)
                    .ok()
                    .map(|_| entry.key)
            })
            .collect()
    }

    pub fn get(&self, lockdown_id: &str) -> Option<Lockdown> {
        self.lock_records().get(lockdown_id).cloned()
    }

    pub fn list_active(&self) -> Vec<Lockdown> {
        self.lock_records()
            .values()
            .filter(|l| l.is_active())
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Lockdown> {
        self.lock_records().values().cloned().collect()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        lock(&self.expiry).next_deadline()
    }

    /// Reinstall persisted lockdown records, scheduling expiry for the
    /// active ones. Their signal claims are restored by the store.
    pub fn restore(&self, lockdowns: Vec<Lockdown>) {
        let mut records = self.lock_records();
        let mut expiry = lock(&self.expiry);
        for lockdown in lockdowns {
            if let Some(n) = lockdown
                .id
                .strip_prefix("lockdown-")
                .and_then(|n| n.parse::<u64>().ok())
            {
                self.next_id.fetch_max(n + 1, Ordering::Relaxed);
            }
            if lockdown.is_active() {
                expiry.schedule(lockdown.id.clone(), lockdown.expires_at);
            }
            records.insert(lockdown.id.clone(), lockdown);
        }
    }

    /// Mark the record ended and release whatever signals it still holds.
    fn end(
        &self,
        lockdown_id: &str,
        reason: EndReason,
        at: Timestamp,
    ) -> Result<Lockdown, LockdownError> {
        let lockdown = {
            let mut records = self.lock_records();
            let record = records
                .get_mut(lockdown_id)
                .ok_or_else(|| LockdownError::NotFound(lockdown_id.to_string()))?;
            if !record.is_active() {
                return Ok(record.clone());
            }
            record.state = LockdownState::Ended { reason, at };
            record.clone()
        };

        for signal_id in &lockdown.affected_signal_ids {
            match self.store.release(signal_id, &lockdown.id) {
                Ok(_) => {}
                // Reclaimed by a vehicle or operator since; leave it alone.
                Err(AuthorityError::NotHolder { current_holder, .. }) => {
                    debug!(%signal_id, lockdown_id, %current_holder, "signal no longer held");
                }
                Err(e) => warn!(error = %e, lockdown_id, "lockdown release failed"),
            }
        }

        info!(lockdown_id, ?reason, "lockdown ended");
        Ok(lockdown)
    }

    fn lock_records(&self) -> MutexGuard<'_, BTreeMap<LockdownId, Lockdown>> {
        lock(&self.lockdowns)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
