//! Offline checks over an audit trace.
//!
//! Replays the log signal by signal and reports any transition that could
//! only happen if two holders were live on the same signal at once.

use std::collections::HashMap;

use greenwave_ir::types::{Claim, SignalId};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, TransitionReason};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum ExclusivityViolation {
    /// `previous_claim` disagrees with what the log says was held.
    BrokenChain {
        seq: u64,
        signal_id: SignalId,
        expected: Option<Claim>,
        found: Option<Claim>,
    },
    /// The reason does not fit the before/after claims.
    ReasonMismatch {
        seq: u64,
        signal_id: SignalId,
        reason: TransitionReason,
    },
    /// Sequence numbers must strictly increase.
    OutOfOrder { seq: u64, after: u64 },
}

/// Check that every signal's history forms a single chain of holders.
pub fn check_exclusive(events: &[AuditEvent]) -> Vec<ExclusivityViolation> {
    let mut violations = Vec::new();
    let mut held: HashMap<&str, Option<&Claim>> = HashMap::new();
    let mut last_seq: Option<u64> = None;

    for event in events {
        if let Some(after) = last_seq {
            if event.seq <= after {
                violations.push(ExclusivityViolation::OutOfOrder {
                    seq: event.seq,
                    after,
                });
            }
        }
        last_seq = Some(event.seq);

        let current = held.get(event.signal_id.as_str()).copied().flatten();
        if current != event.previous_claim.as_ref() {
            violations.push(ExclusivityViolation::BrokenChain {
                seq: event.seq,
                signal_id: event.signal_id.clone(),
                expected: current.cloned(),
                found: event.previous_claim.clone(),
            });
        }

        if !reason_fits(event) {
            violations.push(ExclusivityViolation::ReasonMismatch {
                seq: event.seq,
                signal_id: event.signal_id.clone(),
                reason: event.reason,
            });
        }

        held.insert(event.signal_id.as_str(), event.new_claim.as_ref());
    }

    violations
}

fn reason_fits(event: &AuditEvent) -> bool {
    let prev = event.previous_claim.as_ref();
    let new = event.new_claim.as_ref();
    match event.reason {
        TransitionReason::Accepted => prev.is_none() && new.is_some(),
        TransitionReason::Displaced => match (prev, new) {
            (Some(p), Some(n)) => p.holder_id != n.holder_id || p.kind != n.kind,
            _ => false,
        },
        TransitionReason::Renewed => match (prev, new) {
            (Some(p), Some(n)) => p.holder_id == n.holder_id,
            _ => false,
        },
        TransitionReason::Released | TransitionReason::Expired => prev.is_some() && new.is_none(),
    }
}
