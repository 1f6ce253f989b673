//! Append-only record of every claim transition.

use std::sync::{Mutex, PoisonError};

use greenwave_ir::types::{Claim, SignalId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Claim granted on a signal that had none.
    Accepted,
    /// Claim granted by revoking a lower-precedence claim.
    Displaced,
    /// Holder replaced its own claim.
    Renewed,
    /// Holder released its claim.
    Released,
    /// Claim reached `expires_at`.
    Expired,
}

/// One claim transition on one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Position in the log, strictly increasing from 1.
    pub seq: u64,
    pub signal_id: SignalId,
    pub previous_claim: Option<Claim>,
    pub new_claim: Option<Claim>,
    pub reason: TransitionReason,
    pub timestamp: Timestamp,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted events.
    pub fn from_events(events: Vec<AuditEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    /// Append a transition, assigning its sequence number.
    pub fn append(
        &self,
        signal_id: &str,
        previous_claim: Option<Claim>,
        new_claim: Option<Claim>,
        reason: TransitionReason,
        timestamp: Timestamp,
    ) -> AuditEvent {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = events.last().map_or(1, |e| e.seq + 1);
        let event = AuditEvent {
            seq,
            signal_id: signal_id.to_string(),
            previous_claim,
            new_claim,
            reason,
            timestamp,
        };
        events.push(event.clone());
        event
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn all(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    /// Events with `seq > after`.
    pub fn since(&self, after: u64) -> Vec<AuditEvent> {
        let events = self.lock();
        // seq == index + 1 for logs built by `append`; persisted logs may not
        // start at 1, so search rather than index.
        let start = events.partition_point(|e| e.seq <= after);
        events[start..].to_vec()
    }

    /// The most recent `n` events, oldest first.
    pub fn tail(&self, n: usize) -> Vec<AuditEvent> {
        let events = self.lock();
        let start = events.len().saturating_sub(n);
        events[start..].to_vec()
    }

    pub fn for_signal(&self, signal_id: &str) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|e| e.signal_id == signal_id)
            .cloned()
            .collect()
    }

    /// Replace the whole log. Used when restoring persisted state.
    pub fn replace(&self, events: Vec<AuditEvent>) {
        *self.lock() = events;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
