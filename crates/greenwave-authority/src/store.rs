//! Per-signal claim state machine.
//!
//! ```text
//! NORMAL --accept--> CLAIMED
//! CLAIMED --displace/renew--> CLAIMED (new claim)
//! CLAIMED --release/expire--> NORMAL
//! ```
//!
//! Each signal slot has its own mutex; the check-then-transition sequence
//! of `request_claim`, `release` and expiry runs entirely inside it. Lock
//! order is slot, then expiry queue, then audit log, then event bus. Every
//! transition appends exactly one audit event and publishes the new signal
//! snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use greenwave_corridor::SignalRegistry;
use greenwave_ir::types::{Claim, Signal, SignalId, SignalSite, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditLog, TransitionReason};
use crate::clock::Clock;
use crate::events::{EventBus, FeedEvent};
use crate::expiry::ExpiryQueue;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthorityError {
    #[error("Signal not found: {signal_id}")]
    SignalNotFound { signal_id: SignalId },

    #[error("'{holder_id}' does not hold signal {signal_id} (held by '{current_holder}')")]
    NotHolder {
        signal_id: SignalId,
        holder_id: String,
        current_holder: String,
    },
}

/// Result of submitting a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// Granted; the signal was free or already held by the same holder.
    Accepted,
    /// Granted by revoking `previous`, whose holder sees a displacement.
    Displaced { previous: Claim },
    /// Not granted; `current` keeps the signal.
    Rejected { current: Claim },
}

impl ClaimOutcome {
    pub fn is_granted(&self) -> bool {
        !matches!(self, ClaimOutcome::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released(Claim),
    /// Nothing was held. Repeated releases end up here.
    AlreadyNormal,
}

/// A claim removed by `expire_due`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredClaim {
    pub signal_id: SignalId,
    pub claim: Claim,
}

#[derive(Debug, Default)]
struct Slot {
    claim: Option<Claim>,
    expiry_token: Option<u64>,
}

pub struct AuthorityStore {
    registry: Arc<SignalRegistry>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    slots: RwLock<HashMap<SignalId, Arc<Mutex<Slot>>>>,
    expiry: Mutex<ExpiryQueue<SignalId>>,
    audit: AuditLog,
}

impl AuthorityStore {
    pub fn new(registry: Arc<SignalRegistry>, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self {
            registry,
            clock,
            bus,
            slots: RwLock::new(HashMap::new()),
            expiry: Mutex::new(ExpiryQueue::new()),
            audit: AuditLog::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Submit `claim` for `signal_id`.
    ///
    /// Granted when the signal is free, when the current holder is renewing
    /// a claim of the same kind, or when `claim` outranks the current claim
    /// (see [`Claim::precedence`]). A renewal is folded into the held claim
    /// with [`Claim::renewed_by`], so it never lowers the holder's
    /// precedence. A current claim that is already past its deadline is
    /// expired first.
    pub fn request_claim(
        &self,
        signal_id: &str,
        claim: Claim,
    ) -> Result<ClaimOutcome, AuthorityError> {
        let (site, slot) = self.slot(signal_id)?;
        let mut slot = lock(&slot);
        let now = self.clock.now();

        if slot
            .claim
            .as_ref()
            .is_some_and(|current| current.is_expired_at(now))
        {
            self.expire_locked(&site, &mut slot, now);
        }

        let (reason, outcome, claim) = match &slot.claim {
            None => (TransitionReason::Accepted, ClaimOutcome::Accepted, claim),
            Some(current) if current.holder_id == claim.holder_id && current.kind == claim.kind => {
                let renewed = current.renewed_by(claim);
                (TransitionReason::Renewed, ClaimOutcome::Accepted, renewed)
            }
            Some(current) if claim.outranks(current) => (
                TransitionReason::Displaced,
                ClaimOutcome::Displaced {
                    previous: current.clone(),
                },
                claim,
            ),
            Some(current) => {
                debug!(
                    signal_id,
                    holder = %claim.holder_id,
                    current_holder = %current.holder_id,
                    "claim rejected"
                );
                return Ok(ClaimOutcome::Rejected {
                    current: current.clone(),
                });
            }
        };

        let previous = slot.claim.take();
        self.install_locked(&site, &mut slot, claim.clone());
        let event = self
            .audit
            .append(&site.id, previous, Some(claim.clone()), reason, now);

        match &outcome {
            ClaimOutcome::Displaced { previous } => info!(
                signal_id,
                holder = %claim.holder_id,
                displaced = %previous.holder_id,
                "claim displaced"
            ),
            _ => info!(signal_id, holder = %claim.holder_id, ?reason, "claim accepted"),
        }

        self.publish_locked(&site, &slot, event);
        Ok(outcome)
    }

    /// Release `holder_id`'s claim on `signal_id`.
    pub fn release(
        &self,
        signal_id: &str,
        holder_id: &str,
    ) -> Result<ReleaseOutcome, AuthorityError> {
        let (site, slot) = self.slot(signal_id)?;
        let mut slot = lock(&slot);

        match &slot.claim {
            None => return Ok(ReleaseOutcome::AlreadyNormal),
            Some(current) if current.holder_id != holder_id => {
                return Err(AuthorityError::NotHolder {
                    signal_id: site.id.clone(),
                    holder_id: holder_id.to_string(),
                    current_holder: current.holder_id.clone(),
                });
            }
            Some(_) => {}
        }

        let now = self.clock.now();
        let released = self.revert_locked(&site, &mut slot, TransitionReason::Released, now);
        info!(signal_id, holder = holder_id, "claim released");
        Ok(released.map_or(ReleaseOutcome::AlreadyNormal, ReleaseOutcome::Released))
    }

    /// Revert every claim whose deadline is at or before `now`.
    pub fn expire_due(&self, now: Timestamp) -> Vec<ExpiredClaim> {
        let due = lock(&self.expiry).pop_due(now);
        let mut expired = Vec::new();

        for entry in due {
            let Ok((site, slot)) = self.slot(&entry.key) else {
                continue;
            };
            let mut slot = lock(&slot);
            // A newer claim took the slot after this deadline was popped.
            if slot.expiry_token != Some(entry.token) {
                continue;
            }
            if let Some(claim) = self.expire_locked(&site, &mut slot, now) {
                expired.push(ExpiredClaim {
                    signal_id: site.id.clone(),
                    claim,
                });
            }
        }

        expired
    }

    /// Snapshot of one signal.
    pub fn current_state(&self, signal_id: &str) -> Result<Signal, AuthorityError> {
        let (site, slot) = self.slot(signal_id)?;
        let slot = lock(&slot);
        Ok(Signal::from_site(&site, slot.claim.clone()))
    }

    /// Snapshot of every catalog signal, in catalog order.
    pub fn list_signals(&self) -> Vec<Signal> {
        let catalog = self.registry.snapshot();
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        catalog
            .sites()
            .iter()
            .map(|site| {
                let claim = slots.get(&site.id).and_then(|s| lock(s).claim.clone());
                Signal::from_site(site, claim)
            })
            .collect()
    }

    /// Signals currently held by `holder_id`, sorted by id.
    pub fn held_by(&self, holder_id: &str) -> Vec<SignalId> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut held: Vec<SignalId> = slots
            .iter()
            .filter(|(_, slot)| {
                lock(slot)
                    .claim
                    .as_ref()
                    .is_some_and(|c| c.holder_id == holder_id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        held.sort();
        held
    }

    /// Every live claim, sorted by signal id.
    pub fn active_claims(&self) -> Vec<(SignalId, Claim)> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut claims: Vec<(SignalId, Claim)> = slots
            .iter()
            .filter_map(|(id, slot)| lock(slot).claim.clone().map(|c| (id.clone(), c)))
            .collect();
        claims.sort_by(|a, b| a.0.cmp(&b.0));
        claims
    }

    /// Earliest pending claim deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        lock(&self.expiry).next_deadline()
    }

    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.audit.all()
    }

    pub fn audit_since(&self, after: u64) -> Vec<AuditEvent> {
        self.audit.since(after)
    }

    pub fn audit_tail(&self, n: usize) -> Vec<AuditEvent> {
        self.audit.tail(n)
    }

    /// Reinstall persisted claims and audit history without logging new
    /// transitions. Claims already past their deadline are kept and expire
    /// on the next `expire_due`. Unknown signal ids are skipped and returned.
    pub fn restore(&self, claims: Vec<(SignalId, Claim)>, audit: Vec<AuditEvent>) -> Vec<SignalId> {
        self.audit.replace(audit);
        let mut skipped = Vec::new();
        for (signal_id, claim) in claims {
            let Ok((site, slot)) = self.slot(&signal_id) else {
                skipped.push(signal_id);
                continue;
            };
            let mut slot = lock(&slot);
            self.install_locked(&site, &mut slot, claim);
            self.bus
                .publish(FeedEvent::Signal(Signal::from_site(&site, slot.claim.clone())));
        }
        skipped
    }

    // ── internals ────────────────────────────────────────────────────

    fn slot(&self, signal_id: &str) -> Result<(SignalSite, Arc<Mutex<Slot>>), AuthorityError> {
        let site = self
            .registry
            .get(signal_id)
            .map_err(|_| AuthorityError::SignalNotFound {
                signal_id: signal_id.to_string(),
            })?;

        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signal_id)
        {
            return Ok((site, slot.clone()));
        }

        let slot = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(signal_id.to_string())
            .or_default()
            .clone();
        Ok((site, slot))
    }

    /// Put `claim` in the slot and (re)schedule or cancel its deadline.
    fn install_locked(&self, site: &SignalSite, slot: &mut Slot, claim: Claim) {
        let mut expiry = lock(&self.expiry);
        slot.expiry_token = match claim.expires_at {
            Some(at) => Some(expiry.schedule(site.id.clone(), at)),
            None => {
                expiry.cancel(&site.id);
                None
            }
        };
        slot.claim = Some(claim);
    }

    fn expire_locked(&self, site: &SignalSite, slot: &mut Slot, now: Timestamp) -> Option<Claim> {
        let expired = self.revert_locked(site, slot, TransitionReason::Expired, now);
        if let Some(claim) = &expired {
            info!(signal_id = %site.id, holder = %claim.holder_id, "claim expired");
        }
        expired
    }

    /// Clear the slot back to NORMAL, logging one transition.
    fn revert_locked(
        &self,
        site: &SignalSite,
        slot: &mut Slot,
        reason: TransitionReason,
        now: Timestamp,
    ) -> Option<Claim> {
        let previous = slot.claim.take()?;
        if slot.expiry_token.take().is_some() {
            lock(&self.expiry).cancel(&site.id);
        }
        let event = self
            .audit
            .append(&site.id, Some(previous.clone()), None, reason, now);
        self.publish_locked(site, slot, event);
        Some(previous)
    }

    fn publish_locked(&self, site: &SignalSite, slot: &Slot, event: AuditEvent) {
        self.bus
            .publish(FeedEvent::Signal(Signal::from_site(site, slot.claim.clone())));
        self.bus.publish(FeedEvent::Audit(event));
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
