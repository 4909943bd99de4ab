use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::CacheBackend;
use crate::error::{Error, Result};

/// Writes never trigger a purge below this many entries
const MIN_PURGE_AT: usize = 1024;

#[derive(Default)]
struct Entries {
    map: HashMap<String, (String, Instant)>,
    /// Size at which the next write sweeps expired entries
    purge_at: usize,
}

impl Entries {
    fn purge_expired(&mut self, now: Instant) {
        self.map.retain(|_, (_, expires)| *expires > now);
        self.purge_at = (self.map.len() * 2).max(MIN_PURGE_AT);
    }
}

/// In-process cache backend
///
/// Used when no Redis URL is configured and in tests. Expired entries are
/// dropped on read, on every prefix scan, and by writes whenever the map
/// has doubled since the last sweep. `set_offline(true)` makes every call
/// fail, which is how tests exercise the degraded path.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<Entries>,
    offline: AtomicBool,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            Err(Error::Unavailable("memory cache offline".to_string()))
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.map.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.map.get(key) {
            Some((_, expires)) if *expires <= now => {
                entries.map.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check_online()?;
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|key| {
                entries
                    .map
                    .get(key)
                    .filter(|(_, expires)| *expires > now)
                    .map(|(value, _)| value.clone())
            })
            .collect())
    }

    async fn set_many(&self, new_entries: Vec<(String, String)>, ttl: Duration) -> Result<()> {
        self.check_online()?;
        let now = Instant::now();
        let expires = now + ttl;
        let mut entries = self.entries.lock().await;
        for (key, value) in new_entries {
            entries.map.insert(key, (value, expires));
        }
        if entries.map.len() >= entries.purge_at.max(MIN_PURGE_AT) {
            entries.purge_expired(now);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.purge_expired(now);
        Ok(entries
            .map
            .keys()
            .filter(|key| key.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }
}
