//! Road routing between two points.

use std::time::Duration;

use async_trait::async_trait;
use greenwave_ir::geo;
use greenwave_ir::parse::parse_osrm_route;
use greenwave_ir::types::{Position, Route};
use tracing::debug;

use crate::config::FallbackConfig;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("Route unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn route(&self, origin: Position, destination: Position) -> Result<Route, RouteError>;
}

/// Client for an OSRM `route/v1` server.
#[derive(Debug, Clone)]
pub struct OsrmRouteProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OsrmRouteProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RouteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouteError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn route_url(&self, origin: Position, destination: Position) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url, origin.lng, origin.lat, destination.lng, destination.lat
        )
    }
}

#[async_trait]
impl RouteProvider for OsrmRouteProvider {
    async fn route(&self, origin: Position, destination: Position) -> Result<Route, RouteError> {
        let url = self.route_url(origin, destination);
        debug!(%url, "requesting route");

        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RouteError::Unavailable(e.to_string()))?
            .text()
            .await
            .map_err(|e| RouteError::Unavailable(e.to_string()))?;

        parse_osrm_route(&body).map_err(|e| RouteError::Unavailable(e.to_string()))
    }
}

/// Two-point advisory route used for navigation when routing is down.
///
/// Distance and duration never undercut the configured floors, so ETAs
/// derived from it err on the long side.
pub fn straight_line_fallback(
    origin: Position,
    destination: Position,
    config: &FallbackConfig,
) -> Route {
    let distance_meters = geo::distance(origin, destination).max(config.distance_meters);
    let duration_seconds = (distance_meters / config.speed_mps).max(config.duration_secs as f64);
    Route {
        geometry: vec![origin, destination],
        distance_meters,
        duration_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_url_is_lng_lat() {
        let osrm = OsrmRouteProvider::new("http://osrm.local/", Duration::from_secs(1)).unwrap();
        let url = osrm.route_url(Position::new(23.02, 72.57), Position::new(23.03, 72.58));
        assert_eq!(
            url,
            "http://osrm.local/route/v1/driving/72.57,23.02;72.58,23.03?overview=full&geometries=geojson"
        );
    }

    #[test]
    fn test_fallback_short_hop_uses_floors() {
        let a = Position::new(23.0225, 72.5714);
        let b = Position::new(23.0235, 72.5724);
        let route = straight_line_fallback(a, b, &FallbackConfig::default());
        assert_eq!(route.geometry, vec![a, b]);
        assert_eq!(route.distance_meters, 2000.0);
        assert_eq!(route.duration_seconds, 600.0);
    }

    #[test]
    fn test_fallback_long_hop_scales_with_distance() {
        let a = Position::new(23.0, 72.5);
        let b = Position::new(23.1, 72.5); // ~11.1 km
        let route = straight_line_fallback(a, b, &FallbackConfig::default());
        assert!((route.distance_meters - 11_119.0).abs() < 10.0);
        assert!((route.duration_seconds - route.distance_meters / 8.0).abs() < 1e-9);
    }
}
