//! Bounds Response Cache
//!
//! Short-TTL cache of fully serialized area responses. Keys are bounding
//! boxes snapped outward to a 0.01° grid (floor on min edges, ceil on max
//! edges), so near-identical viewports from many polling clients share one
//! entry and receive byte-identical payloads.
//!
//! Misses are single-flight per key: concurrent requests for a cold cell
//! wait on the first fetch and are served its result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use serde::Serialize;
use skyfuse_common::Bounds;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Grid cells per degree
const GRID_SCALE: f64 = 100.0;

/// Bounding box rounded outward to the cache grid, in hundredths of a degree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundsKey {
    lat_min: i64,
    lon_min: i64,
    lat_max: i64,
    lon_max: i64,
}

impl BoundsKey {
    pub fn from_bounds(bounds: &Bounds) -> Self {
        Self {
            lat_min: (bounds.lat_min * GRID_SCALE).floor() as i64,
            lon_min: (bounds.lon_min * GRID_SCALE).floor() as i64,
            lat_max: (bounds.lat_max * GRID_SCALE).ceil() as i64,
            lon_max: (bounds.lon_max * GRID_SCALE).ceil() as i64,
        }
    }

    /// The snapped box; always contains the box the key was built from
    pub fn to_bounds(&self) -> Bounds {
        Bounds {
            lat_min: (self.lat_min as f64 / GRID_SCALE).max(-90.0),
            lon_min: (self.lon_min as f64 / GRID_SCALE).max(-180.0),
            lat_max: (self.lat_max as f64 / GRID_SCALE).min(90.0),
            lon_max: (self.lon_max as f64 / GRID_SCALE).min(180.0),
        }
    }
}

struct CachedResponse {
    body: Bytes,
    stored_at: Instant,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResponseCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<BoundsKey, CachedResponse>>,
    /// One gate per key with a fetch in progress
    inflight: Mutex<HashMap<BoundsKey, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    async fn lookup(&self, key: &BoundsKey) -> Option<Bytes> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|cached| cached.stored_at.elapsed() < self.ttl)
            .map(|cached| cached.body.clone())
    }

    /// Serve the cached body for `key`, or run `fetch` and cache its result.
    /// Errors from `fetch` are returned and not cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: BoundsKey, fetch: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Some(body) = self.lookup(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(body);
        }

        let gate = self.inflight.lock().await.entry(key).or_default().clone();
        let _turn = gate.lock().await;

        // Whoever held the gate before us may have filled the entry
        let result = match self.lookup(&key).await {
            Some(body) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(body)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let result = fetch().await;
                if let Ok(body) = &result {
                    self.store(key, body.clone()).await;
                }
                result
            }
        };
        self.release(key, &gate).await;
        result
    }

    /// Drop the gate for `key` unless a newer one replaced it
    async fn release(&self, key: BoundsKey, gate: &Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().await;
        if inflight.get(&key).is_some_and(|current| Arc::ptr_eq(current, gate)) {
            inflight.remove(&key);
        }
    }

    async fn store(&self, key: BoundsKey, body: Bytes) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, cached| cached.stored_at.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, cached)| cached.stored_at)
                    .map(|(k, _)| *k);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
            debug!(entries = entries.len(), "Trimmed response cache");
        }
        entries.insert(
            key,
            CachedResponse {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            entries: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;

    fn key(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> BoundsKey {
        BoundsKey::from_bounds(&Bounds::new(lat_min, lon_min, lat_max, lon_max).unwrap())
    }

    #[test]
    fn test_same_grid_cell_same_key() {
        assert_eq!(
            key(10.001, 20.002, 10.498, 20.497),
            key(10.004, 20.009, 10.491, 20.493)
        );
        assert_ne!(key(10.001, 20.0, 10.5, 20.5), key(9.999, 20.0, 10.5, 20.5));
    }

    #[test]
    fn test_snapped_box_contains_original() {
        let original = Bounds::new(10.004, -20.009, 10.491, 20.493).unwrap();
        let snapped = BoundsKey::from_bounds(&original).to_bounds();
        assert!(snapped.lat_min <= original.lat_min);
        assert!(snapped.lon_min <= original.lon_min);
        assert!(snapped.lat_max >= original.lat_max);
        assert!(snapped.lon_max >= original.lon_max);
    }

    #[tokio::test]
    async fn test_second_query_within_ttl_does_not_refetch() {
        let cache = ResponseCache::new(Duration::from_secs(5), 100);
        let calls = AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(Bytes::from_static(b"[]"))
        };

        let first = cache.get_or_fetch(key(10.001, 20.0, 10.5, 20.5), fetch).await.unwrap();
        let second = cache.get_or_fetch(key(10.004, 20.0, 10.5, 20.5), fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let cache = ResponseCache::new(Duration::ZERO, 100);
        let calls = AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(Bytes::from_static(b"[]"))
        };
        let k = key(1.0, 1.0, 2.0, 2.0);
        cache.get_or_fetch(k, fetch).await.unwrap();
        cache.get_or_fetch(k, fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let cache = ResponseCache::new(Duration::from_secs(5), 100);
        let k = key(1.0, 1.0, 2.0, 2.0);
        let failed: Result<Bytes, &str> = cache.get_or_fetch(k, || async { Err("down") }).await;
        assert!(failed.is_err());
        let ok: Result<Bytes, &str> = cache
            .get_or_fetch(k, || async { Ok(Bytes::from_static(b"[1]")) })
            .await;
        assert_eq!(ok.unwrap(), Bytes::from_static(b"[1]"));
    }

    #[tokio::test]
    async fn test_concurrent_cold_queries_fetch_once() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(5), 100));
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key(48.0, 11.0, 48.5, 11.5);

        let requests = (0..20).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(k, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Infallible>(Bytes::from_static(b"[42]"))
                    })
                    .await
            })
        });
        for body in futures::future::join_all(requests).await {
            assert_eq!(body.unwrap().unwrap(), Bytes::from_static(b"[42]"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (19, 1));
        assert!(cache.inflight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        for i in 0..5 {
            let lat = i as f64;
            cache
                .get_or_fetch(key(lat, 0.0, lat + 0.5, 0.5), || async {
                    Ok::<_, Infallible>(Bytes::new())
                })
                .await
                .unwrap();
        }
        assert_eq!(cache.stats().await.entries, 2);
    }
}
