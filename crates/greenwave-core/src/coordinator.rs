//! Vehicle-facing corridor requests.
//!
//! Routing happens before any claim is submitted; the store is never
//! touched while a route fetch is in flight.

use std::sync::Arc;

use greenwave_authority::{AuthorityError, AuthorityStore, ClaimOutcome, ReleaseOutcome};
use greenwave_corridor::{CorridorDetector, DetectError};
use greenwave_ir::types::{Claim, DetectedSignal, Position, Route, SignalId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{FallbackConfig, PreemptionConfig, ServiceConfig};
use crate::route::{straight_line_fallback, RouteProvider};

/// One signal a vehicle wants, as broadcast by the vehicle client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    pub id: SignalId,
    /// Seconds until the vehicle reaches the signal.
    pub eta: f64,
    #[serde(default)]
    pub direction: Option<String>,
}

impl From<&DetectedSignal> for SignalRequest {
    fn from(d: &DetectedSignal) -> Self {
        Self {
            id: d.signal_id.clone(),
            eta: d.eta_seconds,
            direction: None,
        }
    }
}

/// Per-signal result of a corridor request. A mix of granted and rejected
/// signals is the normal case.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutcome {
    pub signal_id: SignalId,
    pub eta_seconds: f64,
    pub result: Result<ClaimOutcome, AuthorityError>,
}

impl SignalOutcome {
    pub fn is_granted(&self) -> bool {
        self.result.as_ref().is_ok_and(ClaimOutcome::is_granted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorridorPlan {
    pub route: Route,
    pub signals: Vec<DetectedSignal>,
    /// True when `route` is the straight-line stand-in.
    pub fallback: bool,
}

pub struct PreemptionCoordinator {
    store: Arc<AuthorityStore>,
    detector: CorridorDetector,
    routes: Arc<dyn RouteProvider>,
    threshold_meters: f64,
    preemption: PreemptionConfig,
    fallback: FallbackConfig,
}

impl PreemptionCoordinator {
    pub fn new(
        store: Arc<AuthorityStore>,
        routes: Arc<dyn RouteProvider>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            detector: CorridorDetector::new(store.registry().clone()),
            store,
            routes,
            threshold_meters: config.detection.threshold_meters,
            preemption: config.preemption.clone(),
            fallback: config.fallback.clone(),
        }
    }

    pub fn store(&self) -> &Arc<AuthorityStore> {
        &self.store
    }

    /// Route from `origin` to `destination` and the signals along it.
    ///
    /// Falls back to a straight line when the provider is down; the plan is
    /// advisory, so an approximate route beats none.
    pub async fn plan(
        &self,
        origin: Position,
        destination: Position,
    ) -> Result<CorridorPlan, DetectError> {
        let (route, fallback) = match self.routes.route(origin, destination).await {
            Ok(route) => (route, false),
            Err(e) => {
                warn!(error = %e, "route provider failed, using straight-line fallback");
                (straight_line_fallback(origin, destination, &self.fallback), true)
            }
        };
        let signals = self.detector.detect(&route, self.threshold_meters)?;
        Ok(CorridorPlan {
            route,
            signals,
            fallback,
        })
    }

    /// Detect signals along `route` and claim them for `vehicle_id`.
    pub fn request_corridor(
        &self,
        vehicle_id: &str,
        route: &Route,
        priority: Option<u32>,
    ) -> Result<Vec<SignalOutcome>, DetectError> {
        let detected = self.detector.detect(route, self.threshold_meters)?;
        let requests: Vec<SignalRequest> = detected.iter().map(SignalRequest::from).collect();
        Ok(self.claim_signals(vehicle_id, &requests, priority))
    }

    /// Claim each requested signal, nearest ETA first.
    pub fn claim_signals(
        &self,
        vehicle_id: &str,
        requests: &[SignalRequest],
        priority: Option<u32>,
    ) -> Vec<SignalOutcome> {
        let priority = priority.unwrap_or(self.preemption.default_priority);
        let grace = self.preemption.grace_period_secs as f64;
        let now = self.store.clock().now();

        let mut ordered: Vec<&SignalRequest> = requests.iter().collect();
        ordered.sort_by(|a, b| a.eta.total_cmp(&b.eta).then_with(|| a.id.cmp(&b.id)));

        let outcomes: Vec<SignalOutcome> = ordered
            .into_iter()
            .map(|req| {
                let eta = req.eta.max(0.0);
                let claim = Claim::vehicle(vehicle_id, priority, eta, now, now.plus_secs(eta + grace))
                    .with_direction(req.direction.clone());
                SignalOutcome {
                    signal_id: req.id.clone(),
                    eta_seconds: eta,
                    result: self.store.request_claim(&req.id, claim),
                }
            })
            .collect();

        let granted = outcomes.iter().filter(|o| o.is_granted()).count();
        info!(
            vehicle = vehicle_id,
            requested = outcomes.len(),
            granted,
            "corridor claimed"
        );
        outcomes
    }

    /// Release `signal_ids` held by `vehicle_id`, or everything it holds
    /// when the list is empty. Signals already reassigned are skipped.
    /// Returns the signals actually released.
    pub fn release_corridor(&self, vehicle_id: &str, signal_ids: &[SignalId]) -> Vec<SignalId> {
        let targets = if signal_ids.is_empty() {
            self.store.held_by(vehicle_id)
        } else {
            signal_ids.to_vec()
        };

        let mut released = Vec::new();
        for signal_id in targets {
            match self.store.release(&signal_id, vehicle_id) {
                Ok(ReleaseOutcome::Released(_)) => released.push(signal_id),
                Ok(ReleaseOutcome::AlreadyNormal) => {}
                Err(AuthorityError::NotHolder { current_holder, .. }) => {
                    debug!(%signal_id, vehicle = vehicle_id, %current_holder, "already reassigned");
                }
                Err(e @ AuthorityError::SignalNotFound { .. }) => {
                    warn!(error = %e, vehicle = vehicle_id, "release of unknown signal");
                }
            }
        }
        released
    }
}
