//! skyfuse-fusion library interface
//!
//! The aircraft-state fusion service: ingest, merge, cache tiers and the
//! read path. Exposed as a library so integration tests can build the
//! router without binding a socket.

pub mod api;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod distributed_cache;
pub mod error;
pub mod ingest;
pub mod live_store;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod refresh;
pub mod response_cache;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::{DateTime, Utc};
use skyfuse_common::events::EventBus;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::collaborators::{NoProvider, NoRoutes, PositionProvider, RouteResolver};
use crate::config::{FusionConfig, SourcesConfig};
use crate::db::SnapshotStore;
use crate::distributed_cache::DistributedCache;
use crate::ingest::{DirectIngest, IngestSink, QueuedIngest};
use crate::live_store::LiveStateStore;
use crate::pipeline::FusionPipeline;
use crate::query::QueryService;
use crate::queue::QueueBackend;
use crate::refresh::AreaRefresher;
use crate::response_cache::ResponseCache;

/// Capacity of the refreshed-snapshot broadcast channel
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// External services the pipeline consults
#[derive(Clone)]
pub struct Collaborators {
    pub routes: Arc<dyn RouteResolver>,
    pub provider: Arc<dyn PositionProvider>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            routes: Arc::new(NoRoutes),
            provider: Arc::new(NoProvider),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FusionPipeline>,
    /// Direct or queued, chosen once at startup
    pub ingest: Arc<dyn IngestSink>,
    pub query: Arc<QueryService>,
    pub response_cache: Arc<ResponseCache>,
    pub refresher: Arc<AreaRefresher>,
    pub sources: Arc<SourcesConfig>,
    pub event_bus: EventBus,
    /// Whether the config asked for a distributed cache
    pub cache_expected: bool,
    pub request_timeout: Duration,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every component from config and the already-connected backends.
    /// A `queue` selects queued ingest; `None` selects the direct path.
    pub fn new(
        config: &FusionConfig,
        store: Arc<dyn SnapshotStore>,
        cache: Arc<DistributedCache>,
        queue: Option<Arc<dyn QueueBackend>>,
        collaborators: Collaborators,
    ) -> Self {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let live = Arc::new(LiveStateStore::new(
            config.live_store.capacity,
            config.live_store.ttl(),
        ));

        let pipeline = Arc::new(
            FusionPipeline::new(live.clone(), cache.clone(), store.clone(), event_bus.clone())
                .with_chunking(config.queue.chunk_size, config.queue.chunk_parallelism),
        );

        let ingest: Arc<dyn IngestSink> = match queue {
            Some(queue) => Arc::new(QueuedIngest::new(queue, pipeline.clone())),
            None => Arc::new(DirectIngest::new(pipeline.clone())),
        };

        let query = Arc::new(QueryService::new(
            live,
            cache,
            store,
            collaborators.routes,
            config.staleness.policy(),
            config.live_store.min_results,
        ));

        let request_timeout = Duration::from_millis(config.server.request_timeout_ms);
        let refresher = Arc::new(AreaRefresher::new(
            collaborators.provider,
            pipeline.clone(),
            config.refresh.provider_source.clone(),
            config.sources.priority(&config.refresh.provider_source),
            Duration::from_millis(config.refresh.timeout_ms),
            // Leave room to build the response inside the request deadline
            request_timeout.mul_f64(0.8),
        ));

        Self {
            pipeline,
            ingest,
            query,
            response_cache: Arc::new(ResponseCache::new(
                Duration::from_millis(config.response_cache.ttl_ms),
                config.response_cache.max_entries,
            )),
            refresher,
            sources: Arc::new(config.sources.clone()),
            event_bus,
            cache_expected: config.distributed_cache.enabled,
            request_timeout,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.request_timeout;

    Router::new()
        .merge(api::ingest_routes())
        .merge(api::query_routes())
        .merge(api::stats_routes())
        .merge(api::health_routes())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        // Map clients call from browsers on other origins
        .layer(CorsLayer::permissive())
        .with_state(state)
}
