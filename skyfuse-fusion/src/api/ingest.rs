//! Feeder ingest endpoint
//!
//! `POST /ingest/aircraft` accepts a batch of positional state records.
//! Malformed records are reported per item and never fail the batch; only
//! a structurally invalid envelope gets a 400.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use skyfuse_common::normalizer::normalize_positional;
use skyfuse_common::SourceMeta;
use tracing::{debug, info};

use crate::pipeline::BatchReport;
use crate::{ApiError, ApiResult, AppState};

/// Source name feeder posts are ranked under; `data_source` is
/// `feeder:<feeder_id>`
pub const FEEDER_SOURCE: &str = "feeder";

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub feeder_id: String,
    pub states: Vec<FeederState>,
}

#[derive(Debug, Deserialize)]
pub struct FeederState {
    /// Positional record: icao24, callsign, origin_country, time_position,
    /// last_contact, longitude, latitude, ...
    pub state: Vec<Value>,
    /// Overrides the envelope's feeder for this item (relayed states)
    #[serde(default)]
    pub feeder_id: Option<String>,
}

/// POST /ingest/aircraft
///
/// **Request:** `{"feeder_id": "...", "states": [{"state": [...]}]}`
/// **Response:** `{"processed": n, "errors": [{"icao24": "...", "error": "..."}]}`
pub async fn ingest_aircraft(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> ApiResult<Json<BatchReport>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let priority = state.sources.priority(FEEDER_SOURCE);
    let ingested_at = Utc::now();
    let mut valid = Vec::with_capacity(request.states.len());
    let mut rejected = Vec::new();

    for item in &request.states {
        let feeder_id = item.feeder_id.as_deref().unwrap_or(&request.feeder_id);
        let meta = SourceMeta::new(
            format!("{}:{}", FEEDER_SOURCE, feeder_id),
            priority,
            ingested_at,
        );
        match normalize_positional(&item.state, &meta) {
            Ok(snapshot) => valid.push(snapshot),
            Err(e) => {
                debug!(feeder_id = %feeder_id, error = %e, "Rejected feeder state");
                rejected.push(e);
            }
        }
    }
    let submitted = valid.len();

    let report = state.ingest.submit(valid).await;
    info!(
        feeder_id = %request.feeder_id,
        submitted,
        processed = report.processed,
        rejected = rejected.len(),
        failed = report.errors.len(),
        "Feeder batch ingested"
    );

    let mut errors = rejected;
    errors.extend(report.errors);
    Ok(Json(BatchReport {
        processed: report.processed,
        errors,
    }))
}

pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/ingest/aircraft", post(ingest_aircraft))
}
