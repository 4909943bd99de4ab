//! Aircraft snapshot table
//!
//! The full snapshot is kept as JSON in `data`; the columns beside it exist
//! only to index lookups and bounds queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skyfuse_common::snapshot::normalize_identifier;
use skyfuse_common::{AircraftSnapshot, Bounds};
use sqlx::{Row, SqlitePool};

use super::SnapshotStore;
use crate::error::Result;

/// Upper bound on rows returned by one bounds query
const MAX_BOUNDS_ROWS: i64 = 5_000;

pub async fn create_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aircraft_snapshots (
            icao24 TEXT PRIMARY KEY,
            callsign TEXT,
            registration TEXT,
            latitude REAL,
            longitude REAL,
            last_contact INTEGER,
            source_priority INTEGER NOT NULL,
            data TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_aircraft_callsign ON aircraft_snapshots(callsign)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_aircraft_registration ON aircraft_snapshots(registration)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_aircraft_position ON aircraft_snapshots(latitude, longitude)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<AircraftSnapshot> {
    let data: String = row.get("data");
    Ok(serde_json::from_str(&data)?)
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn upsert(&self, snapshot: &AircraftSnapshot) -> Result<()> {
        let data = serde_json::to_string(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO aircraft_snapshots (
                icao24, callsign, registration, latitude, longitude,
                last_contact, source_priority, data, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(icao24) DO UPDATE SET
                callsign = excluded.callsign,
                registration = excluded.registration,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                last_contact = excluded.last_contact,
                source_priority = excluded.source_priority,
                data = excluded.data,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&snapshot.icao24)
        .bind(snapshot.callsign.as_deref().and_then(normalize_identifier))
        .bind(snapshot.registration.as_deref().and_then(normalize_identifier))
        .bind(snapshot.latitude)
        .bind(snapshot.longitude)
        .bind(snapshot.last_contact.map(|t| t.timestamp()))
        .bind(snapshot.source_priority)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, icao24: &str) -> Result<Option<AircraftSnapshot>> {
        let row = sqlx::query("SELECT data FROM aircraft_snapshots WHERE icao24 = ?")
            .bind(icao24)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn find_by_identifier(&self, ident: &str) -> Result<Option<AircraftSnapshot>> {
        let ident = match normalize_identifier(ident) {
            Some(ident) => ident,
            None => return Ok(None),
        };
        let row = sqlx::query(
            r#"
            SELECT data FROM aircraft_snapshots
            WHERE callsign = ? OR registration = ?
            ORDER BY last_contact DESC
            LIMIT 1
            "#,
        )
        .bind(&ident)
        .bind(&ident)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn query_bounds(
        &self,
        bounds: &Bounds,
        since: DateTime<Utc>,
    ) -> Result<Vec<AircraftSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM aircraft_snapshots
            WHERE latitude IS NOT NULL AND longitude IS NOT NULL
              AND latitude BETWEEN ? AND ?
              AND longitude BETWEEN ? AND ?
              AND (last_contact IS NULL OR last_contact >= ?)
            ORDER BY last_contact DESC
            LIMIT ?
            "#,
        )
        .bind(bounds.lat_min)
        .bind(bounds.lat_max)
        .bind(bounds.lon_min)
        .bind(bounds.lon_max)
        .bind(since.timestamp())
        .bind(MAX_BOUNDS_ROWS)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfuse_common::time::from_unix_seconds;
    use skyfuse_common::SourceMeta;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteSnapshotStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        create_table(&pool).await.expect("Table creation failed");
        SqliteSnapshotStore::new(pool)
    }

    fn snapshot(icao24: &str, lat: f64, lon: f64, seen: i64) -> AircraftSnapshot {
        let meta = SourceMeta::new("feeder", 10, from_unix_seconds(seen).unwrap());
        let mut s = AircraftSnapshot::new(icao24, &meta);
        s.latitude = Some(lat);
        s.longitude = Some(lon);
        s.last_contact = from_unix_seconds(seen);
        s
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let store = store().await;
        store.upsert(&snapshot("a1b2c3", 10.0, 20.0, 100)).await.unwrap();
        store.upsert(&snapshot("a1b2c3", 11.0, 20.0, 200)).await.unwrap();

        let loaded = store.get("a1b2c3").await.unwrap().unwrap();
        assert_eq!(loaded.latitude, Some(11.0));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM aircraft_snapshots")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_find_by_identifier_is_case_insensitive() {
        let store = store().await;
        let mut s = snapshot("a1b2c3", 10.0, 20.0, 100);
        s.callsign = Some("dlh4ab ".to_string());
        s.registration = Some("D-AIZZ".to_string());
        store.upsert(&s).await.unwrap();

        assert!(store.find_by_identifier("DLH4AB").await.unwrap().is_some());
        assert!(store.find_by_identifier("d-aizz").await.unwrap().is_some());
        assert!(store.find_by_identifier("BAW1").await.unwrap().is_none());
        assert!(store.find_by_identifier("  ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_bounds_filters_position_and_age() {
        let store = store().await;
        store.upsert(&snapshot("aaaaaa", 10.0, 10.0, 1_000)).await.unwrap();
        store.upsert(&snapshot("bbbbbb", 10.0, 10.0, 100)).await.unwrap();
        store.upsert(&snapshot("cccccc", 50.0, 50.0, 1_000)).await.unwrap();

        let bounds = Bounds::new(0.0, 0.0, 20.0, 20.0).unwrap();
        let found = store
            .query_bounds(&bounds, from_unix_seconds(500).unwrap())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].icao24, "aaaaaa");
    }
}
