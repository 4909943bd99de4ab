//! Live State Store
//!
//! In-process map of current aircraft snapshots keyed by `icao24`, bounded
//! by capacity and TTL. It is the first tier for bounds queries.
//!
//! - `upsert` merges the incoming report over the current entry (see
//!   [`skyfuse_common::merge`]) and stamps `updated_at = now`.
//! - Inserting a new key at capacity evicts the least-recently-updated
//!   entry first.
//! - Entries whose `updated_at` is older than the TTL are treated as absent
//!   and pruned lazily by queries, and periodically by the sweeper task.
//!
//! A single `RwLock` guards the map; critical sections are plain map
//! operations with no awaits inside.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use skyfuse_common::merge::merge_snapshot;
use skyfuse_common::snapshot::normalize_identifier;
use skyfuse_common::{AircraftSnapshot, Bounds};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    snapshot: AircraftSnapshot,
    updated_at: DateTime<Utc>,
    /// Position in the update order; larger = more recent
    touch: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// touch → icao24, oldest first
    order: BTreeMap<u64, String>,
    next_touch: u64,
}

impl Inner {
    fn remove(&mut self, icao24: &str) -> Option<Entry> {
        let entry = self.entries.remove(icao24)?;
        self.order.remove(&entry.touch);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let (_, icao24) = self.order.pop_first()?;
        self.entries.remove(&icao24);
        Some(icao24)
    }
}

pub struct LiveStateStore {
    capacity: usize,
    ttl: chrono::Duration,
    inner: RwLock<Inner>,
}

impl LiveStateStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.updated_at) > self.ttl
    }

    /// Merge `incoming` over the current entry and store the result
    pub async fn upsert(&self, incoming: AircraftSnapshot) -> AircraftSnapshot {
        self.upsert_at(incoming, None, Utc::now()).await
    }

    /// Like [`upsert`](Self::upsert), but when this store holds no live entry
    /// for the key, `seed` (e.g. from the distributed cache) stands in as the
    /// existing snapshot
    pub async fn upsert_seeded(
        &self,
        incoming: AircraftSnapshot,
        seed: Option<&AircraftSnapshot>,
    ) -> AircraftSnapshot {
        self.upsert_at(incoming, seed, Utc::now()).await
    }

    pub async fn upsert_at(
        &self,
        incoming: AircraftSnapshot,
        seed: Option<&AircraftSnapshot>,
        now: DateTime<Utc>,
    ) -> AircraftSnapshot {
        let mut inner = self.inner.write().await;
        let key = incoming.icao24.clone();

        let expired = inner
            .entries
            .get(&key)
            .map(|e| self.is_expired(e, now))
            .unwrap_or(false);
        if expired {
            inner.remove(&key);
        }

        let merged = match inner.entries.get(&key) {
            Some(current) => merge_snapshot(Some(&current.snapshot), incoming),
            None => merge_snapshot(seed, incoming),
        };

        if inner.remove(&key).is_none() && inner.entries.len() >= self.capacity {
            if let Some(evicted) = inner.evict_oldest() {
                debug!(icao24 = %evicted, "Evicted least-recently-updated entry");
            }
        }

        let touch = inner.next_touch;
        inner.next_touch += 1;
        inner.order.insert(touch, key.clone());
        inner.entries.insert(
            key,
            Entry {
                snapshot: merged.clone(),
                updated_at: now,
                touch,
            },
        );
        merged
    }

    pub async fn get(&self, icao24: &str) -> Option<AircraftSnapshot> {
        self.get_at(icao24, Utc::now()).await
    }

    pub async fn get_at(&self, icao24: &str, now: DateTime<Utc>) -> Option<AircraftSnapshot> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(icao24)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.snapshot.clone())
    }

    /// Find a live entry by callsign or registration (linear scan)
    pub async fn find_by_identifier(&self, ident: &str) -> Option<AircraftSnapshot> {
        let wanted = normalize_identifier(ident)?;
        let now = Utc::now();
        let inner = self.inner.read().await;
        let matches = |value: &Option<String>| {
            value.as_deref().and_then(normalize_identifier).as_deref() == Some(wanted.as_str())
        };
        inner
            .entries
            .values()
            .filter(|e| !self.is_expired(e, now))
            .find(|e| matches(&e.snapshot.callsign) || matches(&e.snapshot.registration))
            .map(|e| e.snapshot.clone())
    }

    /// Positioned entries inside `bounds` whose last contact is at or after
    /// `recent_threshold` (no last contact counts as fresh)
    pub async fn query_bounds(
        &self,
        bounds: &Bounds,
        recent_threshold: DateTime<Utc>,
    ) -> Vec<AircraftSnapshot> {
        self.query_bounds_at(bounds, recent_threshold, Utc::now()).await
    }

    pub async fn query_bounds_at(
        &self,
        bounds: &Bounds,
        recent_threshold: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<AircraftSnapshot> {
        let mut expired = Vec::new();
        let results = {
            let inner = self.inner.read().await;
            let mut results = Vec::new();
            for (key, entry) in &inner.entries {
                if self.is_expired(entry, now) {
                    expired.push(key.clone());
                    continue;
                }
                let recent = entry
                    .snapshot
                    .last_contact
                    .map(|t| t >= recent_threshold)
                    .unwrap_or(true);
                if recent && bounds.contains_snapshot(&entry.snapshot) {
                    results.push(entry.snapshot.clone());
                }
            }
            results
        };

        if !expired.is_empty() {
            let mut inner = self.inner.write().await;
            for key in expired {
                let still_expired = inner
                    .entries
                    .get(&key)
                    .map(|e| self.is_expired(e, now))
                    .unwrap_or(false);
                if still_expired {
                    inner.remove(&key);
                }
            }
        }
        results
    }

    /// Drop every expired entry; returns how many were removed
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Periodically prune expired entries until `cancel` fires
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.prune_expired(Utc::now()).await;
                        if removed > 0 {
                            debug!(removed, "Swept expired live entries");
                        }
                    }
                }
            }
        })
    }
}
