//! Timeout-bounded refresh
//!
//! A provider refresh runs in its own task and races a deadline. If it
//! finishes in time the caller serves fresh data. If not, the caller serves
//! what the caches already hold and the task keeps running; its results are
//! merged in for the next request instead of being thrown away. A
//! detached task that fails is logged and counted from inside the task.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use skyfuse_common::normalizer::normalize_raw_batch;
use tracing::{debug, info, warn};

use crate::collaborators::PositionProvider;
use crate::error::Result;
use crate::pipeline::{BatchReport, FusionPipeline};

#[derive(Debug, PartialEq)]
pub enum RefreshOutcome {
    /// Finished before the deadline
    Completed(BatchReport),
    /// Still running in the background
    Deferred,
    /// Finished before the deadline, unsuccessfully
    Failed,
}

/// Run `refresh` on its own task and wait at most `deadline` for it
pub async fn refresh_with_deadline<F>(refresh: F, deadline: Duration) -> RefreshOutcome
where
    F: Future<Output = Result<BatchReport>> + Send + 'static,
{
    // Failures are reported here since nobody may be awaiting the handle
    let mut handle = tokio::spawn(async move {
        let result = refresh.await;
        if let Err(e) = &result {
            warn!(error = %e, "Refresh failed");
        }
        result
    });

    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(Ok(report))) => RefreshOutcome::Completed(report),
        Ok(Ok(Err(_))) => RefreshOutcome::Failed,
        Ok(Err(e)) => {
            warn!(error = %e, "Refresh task aborted");
            RefreshOutcome::Failed
        }
        Err(_) => {
            debug!(
                deadline_ms = deadline.as_millis() as u64,
                "Refresh still running, serving cached data"
            );
            // Dropping the handle detaches the task; it keeps running
            drop(handle);
            RefreshOutcome::Deferred
        }
    }
}

#[derive(Debug, Default)]
struct RefreshCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    deferred: AtomicU64,
}

/// Refresh task results, including those that finished after the caller
/// stopped waiting
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefreshStats {
    pub completed: u64,
    pub failed: u64,
    pub deferred: u64,
}

/// Pulls an area from the polling provider and ingests it
pub struct AreaRefresher {
    provider: Arc<dyn PositionProvider>,
    pipeline: Arc<FusionPipeline>,
    source: String,
    priority: i32,
    /// Wait budget when cached data exists
    timeout: Duration,
    /// Wait budget when nothing is cached
    deadline: Duration,
    counters: Arc<RefreshCounters>,
}

impl AreaRefresher {
    pub fn new(
        provider: Arc<dyn PositionProvider>,
        pipeline: Arc<FusionPipeline>,
        source: impl Into<String>,
        priority: i32,
        timeout: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            provider,
            pipeline,
            source: source.into(),
            priority,
            timeout,
            deadline,
            counters: Arc::default(),
        }
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
        }
    }

    pub async fn refresh(
        &self,
        center: (f64, f64),
        radius_nm: f64,
        have_cached: bool,
    ) -> RefreshOutcome {
        let provider = self.provider.clone();
        let pipeline = self.pipeline.clone();
        let source = self.source.clone();
        let priority = self.priority;
        let counters = self.counters.clone();

        let task = async move {
            let states = match provider.fetch_area(center, radius_nm).await {
                Ok(states) => states,
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            };
            let batch = normalize_raw_batch(states, &source, priority, Utc::now());
            let rejected = batch.errors;
            let mut report = pipeline.process_batch(batch.valid).await;
            info!(
                source = %source,
                processed = report.processed,
                rejected = rejected.len(),
                "Provider refresh ingested"
            );
            report.errors.extend(rejected);
            counters.completed.fetch_add(1, Ordering::Relaxed);
            Ok(report)
        };

        let wait = if have_cached { self.timeout } else { self.deadline };
        let outcome = refresh_with_deadline(task, wait).await;
        if outcome == RefreshOutcome::Deferred {
            self.counters.deferred.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoProvider;
    use crate::distributed_cache::DistributedCache;
    use crate::error::Error;
    use crate::live_store::LiveStateStore;
    use crate::pipeline::test_support::RecordingStore;
    use async_trait::async_trait;
    use skyfuse_common::events::EventBus;
    use skyfuse_common::normalizer::RawState;

    struct SlowProvider {
        delay: Duration,
    }

    struct SlowFailingProvider {
        delay: Duration,
    }

    #[async_trait]
    impl PositionProvider for SlowFailingProvider {
        async fn fetch_area(&self, _center: (f64, f64), _radius_nm: f64) -> Result<Vec<RawState>> {
            tokio::time::sleep(self.delay).await;
            Err(Error::Collaborator("provider returned 503".to_string()))
        }
    }

    #[async_trait]
    impl PositionProvider for SlowProvider {
        async fn fetch_area(&self, center: (f64, f64), _radius_nm: f64) -> Result<Vec<RawState>> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![RawState {
                icao24: Some("a1b2c3".to_string()),
                latitude: Some(center.0),
                longitude: Some(center.1),
                ..Default::default()
            }])
        }
    }

    fn pipeline() -> Arc<FusionPipeline> {
        Arc::new(FusionPipeline::new(
            Arc::new(LiveStateStore::new(100, Duration::from_secs(600))),
            Arc::new(DistributedCache::disabled()),
            Arc::new(RecordingStore::default()),
            EventBus::new(16),
        ))
    }

    fn refresher(
        provider: Arc<dyn PositionProvider>,
        pipeline: Arc<FusionPipeline>,
    ) -> AreaRefresher {
        AreaRefresher::new(
            provider,
            pipeline,
            "airplanes_live",
            20,
            Duration::from_millis(20),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_fast_refresh_completes() {
        let outcome = refresh_with_deadline(
            async { Ok(BatchReport { processed: 2, errors: Vec::new() }) },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(
            outcome,
            RefreshOutcome::Completed(BatchReport { processed: 2, errors: Vec::new() })
        );
    }

    #[tokio::test]
    async fn test_failed_refresh() {
        let outcome = refresh_with_deadline(
            async { Err(Error::Collaborator("provider down".to_string())) },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(outcome, RefreshOutcome::Failed);
    }

    #[tokio::test]
    async fn test_slow_refresh_finishes_in_background() {
        let pipeline = pipeline();
        let provider = Arc::new(SlowProvider {
            delay: Duration::from_millis(100),
        });
        let refresher = refresher(provider, pipeline.clone());

        let outcome = refresher.refresh((10.0, 20.0), 5.0, true).await;
        assert_eq!(outcome, RefreshOutcome::Deferred);
        assert!(pipeline.live().get("a1b2c3").await.is_none());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(pipeline.live().get("a1b2c3").await.is_some());
    }

    #[tokio::test]
    async fn test_late_failure_is_recorded() {
        let provider = Arc::new(SlowFailingProvider {
            delay: Duration::from_millis(50),
        });
        let refresher = refresher(provider, pipeline());

        let outcome = refresher.refresh((10.0, 20.0), 5.0, true).await;
        assert_eq!(outcome, RefreshOutcome::Deferred);
        assert_eq!(refresher.stats().failed, 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            refresher.stats(),
            RefreshStats {
                completed: 0,
                failed: 1,
                deferred: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_without_cached_data_waits_for_provider() {
        let pipeline = pipeline();
        let provider = Arc::new(SlowProvider {
            delay: Duration::from_millis(50),
        });
        let refresher = refresher(provider, pipeline.clone());

        let outcome = refresher.refresh((10.0, 20.0), 5.0, false).await;
        assert!(matches!(outcome, RefreshOutcome::Completed(ref r) if r.processed == 1));
        assert!(pipeline.live().get("a1b2c3").await.is_some());
    }

    #[tokio::test]
    async fn test_empty_provider() {
        let refresher = refresher(Arc::new(NoProvider), pipeline());
        let outcome = refresher.refresh((0.0, 0.0), 5.0, true).await;
        assert_eq!(outcome, RefreshOutcome::Completed(BatchReport::default()));
    }
}
