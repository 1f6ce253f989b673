use std::sync::Arc;
use std::time::Duration;

use greenwave_authority::{AuthorityError, AuthorityStore, ClaimOutcome, ReleaseOutcome};
use greenwave_ir::types::{Claim, ADMIN_HOLDER};
use tracing::info;

/// Operator force/clear of individual signals.
///
/// Forced claims are held by [`ADMIN_HOLDER`] and outrank every vehicle
/// and lockdown claim.
pub struct OverrideDesk {
    store: Arc<AuthorityStore>,
}

impl OverrideDesk {
    pub fn new(store: Arc<AuthorityStore>) -> Self {
        Self { store }
    }

    /// Force `signal_id` under operator control, for `ttl` or until cleared.
    pub fn force(
        &self,
        signal_id: &str,
        ttl: Option<Duration>,
    ) -> Result<ClaimOutcome, AuthorityError> {
        let now = self.store.clock().now();
        let expires_at = ttl.map(|ttl| now.plus_secs(ttl.as_secs_f64()));
        let outcome = self
            .store
            .request_claim(signal_id, Claim::manual_override(now, expires_at))?;
        info!(signal_id, ?expires_at, "manual override applied");
        Ok(outcome)
    }

    pub fn clear(&self, signal_id: &str) -> Result<ReleaseOutcome, AuthorityError> {
        self.store.release(signal_id, ADMIN_HOLDER)
    }
}
