//! HTTP API handlers for skyfuse-fusion

pub mod health;
pub mod ingest;
pub mod query;
pub mod stats;

pub use health::health_routes;
pub use ingest::ingest_routes;
pub use query::query_routes;
pub use stats::stats_routes;
