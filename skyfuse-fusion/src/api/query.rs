//! Read endpoints
//!
//! - `GET /query/area/:latmin/:lonmin/:latmax/:lonmax`: served through the
//!   bounds response cache
//! - `GET /query/flights?lat&lon&radius`: refreshes the area from the
//!   polling provider first
//! - `GET /query/aircraft/:ident`: icao24, callsign or registration search

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use skyfuse_common::view::ServedAircraft;
use skyfuse_common::Bounds;
use tracing::debug;

use crate::error::Error;
use crate::refresh::RefreshOutcome;
use crate::response_cache::BoundsKey;
use crate::{ApiError, ApiResult, AppState};

/// Radius used when `/flights` omits one, nautical miles
pub const DEFAULT_RADIUS_NM: f64 = 50.0;

/// GET /query/area/:latmin/:lonmin/:latmax/:lonmax
///
/// The box is snapped outward to the 0.01° cache grid; every client whose
/// viewport snaps to the same cell receives the same bytes until the entry
/// expires.
pub async fn area(
    State(state): State<AppState>,
    path: Result<Path<(f64, f64, f64, f64)>, PathRejection>,
) -> ApiResult<Response> {
    let Path((lat_min, lon_min, lat_max, lon_max)) =
        path.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let bounds = Bounds::new(lat_min, lon_min, lat_max, lon_max)?;
    let key = BoundsKey::from_bounds(&bounds);

    let query = state.query.clone();
    let body = state
        .response_cache
        .get_or_fetch(key, || async move {
            let served = query.area(&key.to_bounds(), Utc::now()).await;
            debug!(count = served.len(), "Built area response");
            serde_json::to_vec(&served).map(Bytes::from).map_err(Error::from)
        })
        .await?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct FlightsParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub radius: Option<f64>,
}

/// GET /query/flights?lat&lon&radius
///
/// Every aircraft the provider returns is merged into the stores before the
/// response is built. When the area already has fresh aircraft, the provider
/// only gets the short refresh timeout; if it misses it, cached data is
/// served and the refresh lands for the next caller.
pub async fn flights(
    State(state): State<AppState>,
    params: Result<Query<FlightsParams>, QueryRejection>,
) -> ApiResult<Json<Vec<ServedAircraft>>> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let radius = params.radius.unwrap_or(DEFAULT_RADIUS_NM);
    let bounds = Bounds::around(params.lat, params.lon, radius)?;

    let now = Utc::now();
    let have_cached = !state
        .pipeline
        .live()
        .query_bounds(&bounds, state.query.policy().recency_cutoff(now))
        .await
        .is_empty();

    let outcome = state
        .refresher
        .refresh((params.lat, params.lon), radius, have_cached)
        .await;
    if let RefreshOutcome::Completed(report) = &outcome {
        debug!(processed = report.processed, "Flights refresh completed in time");
    }

    Ok(Json(state.query.area(&bounds, Utc::now()).await))
}

/// GET /query/aircraft/:ident
pub async fn aircraft(
    State(state): State<AppState>,
    Path(ident): Path<String>,
) -> ApiResult<Json<ServedAircraft>> {
    state
        .query
        .lookup(&ident, Utc::now())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("aircraft {}", ident)))
}

pub fn query_routes() -> Router<AppState> {
    Router::new()
        .route("/query/area/:latmin/:lonmin/:latmax/:lonmax", get(area))
        .route("/query/flights", get(flights))
        .route("/query/aircraft/:ident", get(aircraft))
}
