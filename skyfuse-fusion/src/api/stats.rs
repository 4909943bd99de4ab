//! Observability endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::distributed_cache::CacheStats;
use crate::ingest::IngestMode;
use crate::refresh::RefreshStats;
use crate::response_cache::ResponseCacheStats;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LiveStoreStats {
    pub entries: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub mode: IngestMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
    /// `None` when the backend could not be asked
    pub depth: Option<usize>,
    pub dead_letters: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub live_store: LiveStoreStats,
    pub distributed_cache: CacheStats,
    pub response_cache: ResponseCacheStats,
    pub queue: QueueStats,
    pub provider_refresh: RefreshStats,
    pub event_subscribers: usize,
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let live = state.pipeline.live();

    let queue = match state.ingest.queue() {
        Some(queue) => {
            let depth = queue
                .depth()
                .await
                .map_err(|e| warn!(error = %e, "Queue depth unavailable"))
                .ok();
            let dead_letters = queue
                .dead_letter_depth()
                .await
                .map_err(|e| warn!(error = %e, "Dead-letter depth unavailable"))
                .ok();
            QueueStats {
                mode: state.ingest.mode(),
                backend: Some(queue.name()),
                depth,
                dead_letters,
            }
        }
        None => QueueStats {
            mode: state.ingest.mode(),
            backend: None,
            depth: None,
            dead_letters: None,
        },
    };

    Json(StatsResponse {
        live_store: LiveStoreStats {
            entries: live.len().await,
            capacity: live.capacity(),
        },
        distributed_cache: state.pipeline.cache().stats(),
        response_cache: state.response_cache.stats().await,
        queue,
        provider_refresh: state.refresher.stats(),
        event_subscribers: state.event_bus.subscriber_count(),
    })
}

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}
