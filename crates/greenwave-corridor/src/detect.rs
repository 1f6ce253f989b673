//! Route-to-signal corridor matching.
//!
//! Every catalog signal is compared against every route vertex; a signal is
//! on the corridor when its nearest vertex lies strictly inside the
//! threshold. ETA is the path-progress fraction of that vertex times the
//! route duration. This assumes roughly uniform speed along the route and
//! ignores uneven vertex spacing. Cost is O(signals x vertices).

use std::cmp::Ordering;
use std::sync::Arc;

use greenwave_ir::geo::distance;
use greenwave_ir::types::{DetectedSignal, Route, SignalSite};
use rayon::prelude::*;
use tracing::debug;

use crate::registry::SignalRegistry;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectError {
    #[error("Route geometry has {points} point(s); at least 2 are required")]
    RouteInvalid { points: usize },
}

pub struct CorridorDetector {
    registry: Arc<SignalRegistry>,
}

impl CorridorDetector {
    pub fn new(registry: Arc<SignalRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    /// Signals within `threshold_meters` of the route, ascending by ETA.
    pub fn detect(
        &self,
        route: &Route,
        threshold_meters: f64,
    ) -> Result<Vec<DetectedSignal>, DetectError> {
        let catalog = self.registry.snapshot();
        detect_in(catalog.sites(), route, threshold_meters)
    }
}

/// Match `sites` against `route`. Ties on ETA are ordered by signal id.
pub fn detect_in(
    sites: &[SignalSite],
    route: &Route,
    threshold_meters: f64,
) -> Result<Vec<DetectedSignal>, DetectError> {
    let points = route.geometry.len();
    if points < 2 {
        return Err(DetectError::RouteInvalid { points });
    }
    let last_index = (points - 1) as f64;

    let mut detected: Vec<DetectedSignal> = sites
        .par_iter()
        .filter_map(|site| {
            let (min_index, min_distance) = nearest_vertex(site, route);
            if min_distance < threshold_meters {
                Some(DetectedSignal {
                    signal_id: site.id.clone(),
                    eta_seconds: (min_index as f64 / last_index) * route.duration_seconds,
                    distance_to_route_meters: min_distance,
                })
            } else {
                None
            }
        })
        .collect();

    detected.sort_by(|a, b| {
        a.eta_seconds
            .total_cmp(&b.eta_seconds)
            .then_with(|| a.signal_id.cmp(&b.signal_id))
    });

    debug!(
        candidates = sites.len(),
        route_points = points,
        matched = detected.len(),
        threshold_meters,
        "corridor detection complete"
    );

    Ok(detected)
}

/// Index and distance of the route vertex nearest to `site`. The first
/// vertex wins on equal distance.
fn nearest_vertex(site: &SignalSite, route: &Route) -> (usize, f64) {
    route
        .geometry
        .iter()
        .enumerate()
        .map(|(i, vertex)| (i, distance(site.position, *vertex)))
        .fold((0, f64::INFINITY), |best, candidate| {
            match candidate.1.partial_cmp(&best.1) {
                Some(Ordering::Less) => candidate,
                _ => best,
            }
        })
}
