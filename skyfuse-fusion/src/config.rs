//! Configuration for skyfuse-fusion
//!
//! Loaded once at startup from a TOML file (see
//! [`skyfuse_common::config::resolve_config_path`]). Every field has a
//! built-in default, so a missing or partial file still starts the service.
//! CLI flags override `server.port`, `database.path` and
//! `distributed_cache.url` after loading.

use serde::Deserialize;
use skyfuse_common::staleness::StalenessPolicy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "fusion.toml";

/// Priority given to sources missing from the `[sources]` table
pub const UNKNOWN_SOURCE_PRIORITY: i32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub live_store: LiveStoreConfig,
    pub distributed_cache: DistributedCacheConfig,
    pub queue: QueueConfig,
    pub response_cache: ResponseCacheConfig,
    pub staleness: StalenessConfig,
    pub sources: SourcesConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Overall per-request deadline
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5780,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("skyfuse.db"),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveStoreConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
    /// Below this many results, bounds queries also read the durable store
    pub min_results: usize,
    pub sweep_interval_secs: u64,
}

impl Default for LiveStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 50_000,
            ttl_secs: 1_800,
            min_results: 1,
            sweep_interval_secs: 60,
        }
    }
}

impl LiveStoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DistributedCacheConfig {
    pub enabled: bool,
    /// Redis URL; when absent the cache runs in-process only
    pub url: Option<String>,
    pub ttl_secs: u64,
    /// Reads that gate a response give up after this long
    pub read_timeout_ms: u64,
    /// Maximum keys enumerated by a bounds query
    pub scan_limit: usize,
    /// Bounds scans give up after this long
    pub scan_timeout_ms: u64,
}

impl Default for DistributedCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            ttl_secs: 1_800,
            read_timeout_ms: 150,
            scan_limit: 5_000,
            scan_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub enabled: bool,
    /// Redis URL; when absent an in-process queue is used
    pub url: Option<String>,
    pub workers: usize,
    pub pop_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Sub-batch size for large ingest batches
    pub chunk_size: usize,
    /// Sub-batches processed concurrently
    pub chunk_parallelism: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            workers: 4,
            pop_timeout_ms: 1_000,
            max_retries: 3,
            retry_backoff_ms: 250,
            chunk_size: 10,
            chunk_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponseCacheConfig {
    pub ttl_ms: u64,
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 2_000,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub recency_window_minutes: i64,
    pub visibility_window_minutes: i64,
    pub stale_search_threshold_minutes: i64,
    pub landed_override_threshold_minutes: i64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            recency_window_minutes: 15,
            visibility_window_minutes: 30,
            stale_search_threshold_minutes: 360,
            landed_override_threshold_minutes: 30,
        }
    }
}

impl StalenessConfig {
    pub fn policy(&self) -> StalenessPolicy {
        StalenessPolicy {
            recency_window: chrono::Duration::minutes(self.recency_window_minutes),
            visibility_window: chrono::Duration::minutes(self.visibility_window_minutes),
            stale_search_threshold: chrono::Duration::minutes(self.stale_search_threshold_minutes),
            landed_override_threshold: chrono::Duration::minutes(
                self.landed_override_threshold_minutes,
            ),
        }
    }
}

/// Source name → priority (lower = more authoritative)
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct SourcesConfig(pub HashMap<String, i32>);

impl Default for SourcesConfig {
    fn default() -> Self {
        Self(HashMap::from([
            ("feeder".to_string(), 10),
            ("airplanes_live".to_string(), 20),
            ("opensky".to_string(), 30),
        ]))
    }
}

impl SourcesConfig {
    pub fn priority(&self, source: &str) -> i32 {
        self.0
            .get(source)
            .copied()
            .unwrap_or(UNKNOWN_SOURCE_PRIORITY)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Name of the polling provider behind `/flights`
    pub provider_source: String,
    /// How long a request waits for a provider refresh when cached data
    /// exists
    pub timeout_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            provider_source: "airplanes_live".to_string(),
            timeout_ms: 1_500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfuse_common::config::parse_toml;

    #[test]
    fn test_defaults() {
        let config = FusionConfig::default();
        assert_eq!(config.queue.chunk_size, 10);
        assert!(!config.queue.enabled);
        assert_eq!(config.sources.priority("feeder"), 10);
        assert_eq!(config.sources.priority("airplanes_live"), 20);
        assert_eq!(config.sources.priority("unknown"), UNKNOWN_SOURCE_PRIORITY);
        assert_eq!(config.staleness.policy(), StalenessPolicy::default());
    }

    #[test]
    fn test_partial_toml() {
        let config: FusionConfig = parse_toml(
            r#"
            [server]
            port = 9000

            [queue]
            enabled = true
            workers = 8

            [sources]
            feeder = 5
            adsb_lol = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert!(config.queue.enabled);
        assert_eq!(config.queue.workers, 8);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.sources.priority("feeder"), 5);
        assert_eq!(config.sources.priority("adsb_lol"), 25);
        assert_eq!(config.live_store.capacity, 50_000);
    }
}
