use serde::Deserialize;

use crate::types::{Position, Route, SignalSite};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Routing service returned code '{code}'")]
    RouteCode { code: String },

    #[error("Routing response contained no routes")]
    NoRoutes,
}

/// A signal catalog document: `{ "signals": [ ... ] }`.
#[derive(Debug, Deserialize)]
struct CatalogDocument {
    signals: Vec<SignalSite>,
}

pub fn parse_catalog(json: &str) -> Result<Vec<SignalSite>, ParseError> {
    let doc: CatalogDocument = serde_json::from_str(json)?;
    Ok(doc.signals)
}

// OSRM `route/v1` response, `geometries=geojson`. Coordinates are [lng, lat].

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Parse an OSRM route response, taking the first (best) route.
pub fn parse_osrm_route(json: &str) -> Result<Route, ParseError> {
    let resp: OsrmResponse = serde_json::from_str(json)?;
    if resp.code != "Ok" {
        return Err(ParseError::RouteCode { code: resp.code });
    }
    let best = resp.routes.into_iter().next().ok_or(ParseError::NoRoutes)?;

    Ok(Route {
        geometry: best
            .geometry
            .coordinates
            .into_iter()
            .map(|[lng, lat]| Position::new(lat, lng))
            .collect(),
        distance_meters: best.distance,
        duration_seconds: best.duration,
    })
}
