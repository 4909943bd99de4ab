//! Distributed Cache
//!
//! Cross-process mirror of the Live State Store over an external key/value
//! store. Key layout, all sharing one TTL:
//!
//! | Key | Value |
//! |---|---|
//! | `icao:<icao24>` | full JSON snapshot |
//! | `callsign:<CALLSIGN>` | `icao24` (pointer only) |
//! | `registration:<REG>` | `icao24` (pointer only) |
//!
//! Identifier lookups resolve the secondary key first, then fetch the
//! primary.
//!
//! **Bounds queries are approximate and cost-bounded.** They enumerate at
//! most `scan_limit` primary keys and bulk-fetch them. Full-keyspace scans
//! do not scale; a production deployment with a large fleet should page
//! through keys across requests or move to a geo-indexed store.
//!
//! The cache is optional. When disabled or unreachable every read is a
//! miss and every write is dropped with a log line; callers fall back to
//! the Live State Store and the durable store. Reads that gate a response
//! are bounded by a short timeout and count as misses when it expires.

mod memory;
mod redis_backend;

pub use memory::MemoryCacheBackend;
pub use redis_backend::RedisCacheBackend;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skyfuse_common::snapshot::{normalize_icao24, normalize_identifier};
use skyfuse_common::{AircraftSnapshot, Bounds};
use tracing::{debug, warn};

use crate::config::DistributedCacheConfig;
use crate::error::{Error, Result};

/// Keys fetched per MGET during bounds queries
const FETCH_CHUNK: usize = 500;

pub fn primary_key(icao24: &str) -> String {
    format!("icao:{}", icao24)
}

pub fn callsign_key(callsign: &str) -> String {
    format!("callsign:{}", callsign)
}

pub fn registration_key(registration: &str) -> String {
    format!("registration:{}", registration)
}

/// Minimal key/value surface the cache needs from its backing store
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs and stats
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Values in the same order as `keys`; absent keys yield `None`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Write all entries with the same TTL
    async fn set_many(&self, entries: Vec<(String, String)>, ttl: Duration) -> Result<()>;

    /// Enumerate up to `limit` keys beginning with `prefix`
    async fn scan_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
}

/// Point-in-time view of cache counters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub enabled: bool,
    pub backend: Option<&'static str>,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub writes: u64,
}

pub struct DistributedCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
    read_timeout: Duration,
    scan_timeout: Duration,
    scan_limit: usize,
    counters: CacheCounters,
}

impl DistributedCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &DistributedCacheConfig) -> Self {
        Self {
            backend: Some(backend),
            ttl: Duration::from_secs(config.ttl_secs),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            scan_timeout: Duration::from_millis(config.scan_timeout_ms),
            scan_limit: config.scan_limit,
            counters: CacheCounters::default(),
        }
    }

    /// A cache that misses on every read and drops every write
    pub fn disabled() -> Self {
        let config = DistributedCacheConfig::default();
        Self {
            backend: None,
            ttl: Duration::from_secs(config.ttl_secs),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            scan_timeout: Duration::from_millis(config.scan_timeout_ms),
            scan_limit: config.scan_limit,
            counters: CacheCounters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    fn record_lookup<T>(&self, result: &Option<T>) {
        let counter = if result.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Run a backend read under `limit`; failures and timeouts become `None`
    async fn bounded<T, F>(&self, limit: Duration, what: &str, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Distributed cache {} failed", what);
                None
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!("Distributed cache {} timed out after {:?}", what, limit);
                None
            }
        }
    }

    /// Fetch the snapshot stored under `icao:<icao24>`
    pub async fn get(&self, icao24: &str) -> Option<AircraftSnapshot> {
        let backend = self.backend.as_ref()?;
        let snapshot = self.fetch_primary(backend.as_ref(), icao24).await;
        self.record_lookup(&snapshot);
        snapshot
    }

    /// Resolve an icao24, callsign or registration to a snapshot
    ///
    /// Counts exactly one hit or miss however many keys were read.
    pub async fn lookup(&self, ident: &str) -> Option<AircraftSnapshot> {
        let backend = self.backend.as_ref()?;
        let snapshot = self.resolve(backend.as_ref(), ident).await;
        self.record_lookup(&snapshot);
        snapshot
    }

    async fn resolve(&self, backend: &dyn CacheBackend, ident: &str) -> Option<AircraftSnapshot> {
        if let Some(icao24) = normalize_icao24(ident) {
            if let Some(snapshot) = self.fetch_primary(backend, &icao24).await {
                return Some(snapshot);
            }
        }

        let ident = normalize_identifier(ident)?;
        for key in [callsign_key(&ident), registration_key(&ident)] {
            let pointer = self
                .bounded(self.read_timeout, "index lookup", backend.get(&key))
                .await
                .flatten();
            if let Some(icao24) = pointer {
                return self.fetch_primary(backend, &icao24).await;
            }
        }
        None
    }

    async fn fetch_primary(
        &self,
        backend: &dyn CacheBackend,
        icao24: &str,
    ) -> Option<AircraftSnapshot> {
        self.bounded(self.read_timeout, "get", backend.get(&primary_key(icao24)))
            .await
            .flatten()
            .and_then(|json| decode(&json))
    }

    /// Write the snapshot and its secondary index pointers
    pub async fn put(&self, snapshot: &AircraftSnapshot) -> Result<()> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| Error::Unavailable("distributed cache disabled".to_string()))?;

        let mut entries = vec![(
            primary_key(&snapshot.icao24),
            serde_json::to_string(snapshot)?,
        )];
        if let Some(callsign) = snapshot.callsign.as_deref().and_then(normalize_identifier) {
            entries.push((callsign_key(&callsign), snapshot.icao24.clone()));
        }
        if let Some(reg) = snapshot
            .registration
            .as_deref()
            .and_then(normalize_identifier)
        {
            entries.push((registration_key(&reg), snapshot.icao24.clone()));
        }

        backend.set_many(entries, self.ttl).await?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fire-and-forget write; errors are logged, never returned
    pub fn spawn_put(self: &Arc<Self>, snapshot: AircraftSnapshot) {
        if !self.is_enabled() {
            return;
        }
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = cache.put(&snapshot).await {
                cache.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(icao24 = %snapshot.icao24, error = %e, "Distributed cache write failed");
            }
        });
    }

    /// Approximate bounds query over at most `scan_limit` cached aircraft
    pub async fn query_bounds(
        &self,
        bounds: &Bounds,
        recent_threshold: DateTime<Utc>,
    ) -> Vec<AircraftSnapshot> {
        let backend = match self.backend.as_ref() {
            Some(backend) => backend,
            None => return Vec::new(),
        };

        let scan = async {
            let keys = backend.scan_prefix("icao:", self.scan_limit).await?;
            let mut found = Vec::new();
            for chunk in keys.chunks(FETCH_CHUNK) {
                for raw in backend.get_many(chunk).await?.into_iter().flatten() {
                    if let Some(snapshot) = decode(&raw) {
                        let recent = snapshot
                            .last_contact
                            .map(|t| t >= recent_threshold)
                            .unwrap_or(true);
                        if recent && bounds.contains_snapshot(&snapshot) {
                            found.push(snapshot);
                        }
                    }
                }
            }
            Ok::<_, Error>(found)
        };

        let found = self
            .bounded(self.scan_timeout, "bounds scan", scan)
            .await
            .unwrap_or_default();
        self.record_lookup(&(!found.is_empty()).then_some(()));
        found
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.is_enabled(),
            backend: self.backend.as_ref().map(|b| b.name()),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }
}

fn decode(json: &str) -> Option<AircraftSnapshot> {
    match serde_json::from_str(json) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(error = %e, "Discarding undecodable cached snapshot");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfuse_common::SourceMeta;

    fn snapshot(icao24: &str, lat: f64, lon: f64) -> AircraftSnapshot {
        let meta = SourceMeta::new("feeder", 10, Utc::now());
        let mut s = AircraftSnapshot::new(icao24, &meta);
        s.latitude = Some(lat);
        s.longitude = Some(lon);
        s.last_contact = Some(Utc::now());
        s.callsign = Some("DLH4AB".to_string());
        s.registration = Some("D-AIZZ".to_string());
        s
    }

    fn cache() -> (Arc<MemoryCacheBackend>, DistributedCache) {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = DistributedCache::new(backend.clone(), &DistributedCacheConfig::default());
        (backend, cache)
    }

    #[tokio::test]
    async fn test_put_writes_primary_and_pointer_keys() {
        let (backend, cache) = cache();
        cache.put(&snapshot("a1b2c3", 1.0, 1.0)).await.unwrap();

        assert!(backend.get("icao:a1b2c3").await.unwrap().is_some());
        assert_eq!(
            backend.get("callsign:DLH4AB").await.unwrap().as_deref(),
            Some("a1b2c3")
        );
        assert_eq!(
            backend.get("registration:D-AIZZ").await.unwrap().as_deref(),
            Some("a1b2c3")
        );
    }

    #[tokio::test]
    async fn test_lookup_by_each_identifier() {
        let (_, cache) = cache();
        cache.put(&snapshot("a1b2c3", 1.0, 1.0)).await.unwrap();

        for ident in ["A1B2C3", "dlh4ab", "D-AIZZ"] {
            let found = cache.lookup(ident).await;
            assert_eq!(found.map(|s| s.icao24).as_deref(), Some("a1b2c3"), "{}", ident);
        }
        assert!(cache.lookup("BAW1").await.is_none());
    }

    #[tokio::test]
    async fn test_hit_and_miss_counters() {
        let (_, cache) = cache();
        cache.put(&snapshot("a1b2c3", 1.0, 1.0)).await.unwrap();
        assert!(cache.get("a1b2c3").await.is_some());
        assert!(cache.get("ffffff").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.backend, Some("memory"));
    }

    #[tokio::test]
    async fn test_identifier_lookup_counts_once() {
        let (backend, cache) = cache();
        cache.put(&snapshot("a1b2c3", 1.0, 1.0)).await.unwrap();
        // Pointer whose primary entry is gone
        backend
            .set_many(
                vec![("callsign:BAW1".to_string(), "eeeeee".to_string())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(cache.lookup("BAW1").await.is_none());
        assert_eq!((cache.stats().hits, cache.stats().misses), (0, 1));

        // Hex-looking ident misses the primary key and both pointers
        assert!(cache.lookup("abcdef").await.is_none());
        assert_eq!((cache.stats().hits, cache.stats().misses), (0, 2));

        assert!(cache.lookup("DLH4AB").await.is_some());
        assert_eq!((cache.stats().hits, cache.stats().misses), (1, 2));
    }

    #[tokio::test]
    async fn test_disabled_cache_misses_and_rejects_writes() {
        let cache = DistributedCache::disabled();
        assert!(!cache.is_enabled());
        assert!(cache.get("a1b2c3").await.is_none());
        assert!(cache.put(&snapshot("a1b2c3", 1.0, 1.0)).await.is_err());
        let bounds = Bounds::new(-90.0, -180.0, 90.0, 180.0).unwrap();
        assert!(cache.query_bounds(&bounds, Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades_to_miss() {
        let (backend, cache) = cache();
        cache.put(&snapshot("a1b2c3", 1.0, 1.0)).await.unwrap();
        backend.set_offline(true);

        assert!(cache.get("a1b2c3").await.is_none());
        assert_eq!(cache.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_query_bounds_filters_cached_positions() {
        let (_, cache) = cache();
        cache.put(&snapshot("aaaaaa", 10.0, 10.0)).await.unwrap();
        cache.put(&snapshot("bbbbbb", 50.0, 50.0)).await.unwrap();

        let bounds = Bounds::new(0.0, 0.0, 20.0, 20.0).unwrap();
        let found = cache
            .query_bounds(&bounds, Utc::now() - chrono::Duration::minutes(5))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].icao24, "aaaaaa");
    }
}
