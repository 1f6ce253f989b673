//! Durable snapshot of live claims, lockdowns and the audit log.

use std::path::{Path, PathBuf};

use greenwave_authority::{AuditEvent, AuthorityStore};
use greenwave_ir::types::{Claim, Lockdown, SignalId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::lockdown::LockdownManager;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("State file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("State JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedClaim {
    pub signal_id: SignalId,
    pub claim: Claim,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSnapshot {
    pub signals: Vec<PersistedClaim>,
    pub lockdowns: Vec<Lockdown>,
    pub audit: Vec<AuditEvent>,
}

impl StateSnapshot {
    pub fn capture(store: &AuthorityStore, lockdowns: &LockdownManager) -> Self {
        Self {
            signals: store
                .active_claims()
                .into_iter()
                .map(|(signal_id, claim)| PersistedClaim { signal_id, claim })
                .collect(),
            lockdowns: lockdowns.list_all(),
            audit: store.audit_log(),
        }
    }

    /// Put the snapshot back into a freshly built store and manager.
    /// Returns signal ids that are no longer in the catalog.
    pub fn restore(self, store: &AuthorityStore, lockdowns: &LockdownManager) -> Vec<SignalId> {
        let claims = self
            .signals
            .into_iter()
            .map(|p| (p.signal_id, p.claim))
            .collect();
        let skipped = store.restore(claims, self.audit);
        lockdowns.restore(self.lockdowns);
        for signal_id in &skipped {
            warn!(%signal_id, "persisted claim for unknown signal dropped");
        }
        skipped
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let json = self.to_json()?;
        // The previous file stays intact until the new one is complete.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|source| PersistError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            path = %path.display(),
            claims = self.signals.len(),
            lockdowns = self.lockdowns.len(),
            "state saved"
        );
        Ok(())
    }

    /// `Ok(None)` when no state file exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>, PersistError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
