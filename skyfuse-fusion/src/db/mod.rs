//! Durable snapshot storage
//!
//! The durable store is the fallback source of truth behind the caches.
//! Writes are single-row upserts keyed by `icao24`, so a failed write can be
//! retried blindly.

pub mod aircraft;

pub use aircraft::SqliteSnapshotStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skyfuse_common::{AircraftSnapshot, Bounds};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

use crate::error::Result;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for its `icao24`
    async fn upsert(&self, snapshot: &AircraftSnapshot) -> Result<()>;

    async fn get(&self, icao24: &str) -> Result<Option<AircraftSnapshot>>;

    /// Most recently seen aircraft with this callsign or registration
    async fn find_by_identifier(&self, ident: &str) -> Result<Option<AircraftSnapshot>>;

    /// Positioned snapshots inside `bounds` last seen at or after `since`
    async fn query_bounds(
        &self,
        bounds: &Bounds,
        since: DateTime<Utc>,
    ) -> Result<Vec<AircraftSnapshot>>;
}

/// Open (creating if needed) the SQLite database and its tables
pub async fn init_database_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(skyfuse_common::Error::from)?;
        }
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&db_url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    aircraft::create_table(&pool).await?;
    tracing::info!("Opened database: {}", db_path.display());
    Ok(pool)
}
