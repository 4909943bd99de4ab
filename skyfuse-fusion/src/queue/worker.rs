//! Queue worker pool
//!
//! Failed messages are pushed back after a backoff from their own task so
//! a worker is never parked on one message. Those tasks share a tracker
//! with the workers; the pool only reports done once every pending requeue
//! has been pushed, so shutdown does not lose a message that was waiting
//! out its backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use skyfuse_common::events::FusionEvent;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{IngestMessage, QueueBackend};
use crate::config::QueueConfig;
use crate::pipeline::FusionPipeline;

/// Cap on the backoff exponent
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub pop_timeout: Duration,
    /// Retries after the first failed attempt before dead-lettering
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl From<&QueueConfig> for WorkerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            pop_timeout: Duration::from_millis(config.pop_timeout_ms),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Delay before the retry that follows failed attempt number `attempt`
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u32 << shift)
}

/// Start `config.workers` tasks consuming `queue` until `cancel` fires
///
/// The last handle resolves once the workers have stopped and every
/// requeue they scheduled has been pushed.
pub fn spawn_workers(
    queue: Arc<dyn QueueBackend>,
    pipeline: Arc<FusionPipeline>,
    config: WorkerConfig,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    info!(
        workers = config.workers,
        backend = queue.name(),
        "Starting ingestion queue workers"
    );
    let tracker = TaskTracker::new();
    let mut handles: Vec<JoinHandle<()>> = (0..config.workers)
        .map(|worker_id| {
            let queue = queue.clone();
            let pipeline = pipeline.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let requeues = tracker.clone();
            tracker.spawn(async move {
                run_worker(worker_id, queue, pipeline, config, cancel, requeues).await;
            })
        })
        .collect();

    handles.push(tokio::spawn(async move {
        cancel.cancelled().await;
        tracker.close();
        tracker.wait().await;
        debug!("Queue workers and pending requeues drained");
    }));
    handles
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<dyn QueueBackend>,
    pipeline: Arc<FusionPipeline>,
    config: WorkerConfig,
    cancel: CancellationToken,
    requeues: TaskTracker,
) {
    // Cancellation is checked between pops so a popped message is never
    // dropped mid-flight
    while !cancel.is_cancelled() {
        match queue.pop(config.pop_timeout).await {
            Ok(Some(payload)) => {
                handle_payload(&queue, &pipeline, &config, &cancel, &requeues, payload).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(worker_id, error = %e, "Queue pop failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.retry_backoff) => {}
                }
            }
        }
    }
    debug!(worker_id, "Queue worker stopped");
}

async fn handle_payload(
    queue: &Arc<dyn QueueBackend>,
    pipeline: &Arc<FusionPipeline>,
    config: &WorkerConfig,
    cancel: &CancellationToken,
    requeues: &TaskTracker,
    payload: String,
) {
    let mut message = match IngestMessage::decode(&payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Undecodable queue message, dead-lettering");
            if let Err(e) = queue.dead_letter(payload).await {
                error!(error = %e, "Dead-letter push failed, message dropped");
            }
            return;
        }
    };

    let e = match pipeline.apply(message.snapshot.clone()).await {
        Ok(_) => return,
        Err(e) => e,
    };

    message.attempts += 1;
    let icao24 = message.snapshot.icao24.clone();

    if message.attempts > config.max_retries {
        warn!(
            message_id = %message.id,
            icao24 = %icao24,
            attempts = message.attempts,
            error = %e,
            "Queue message exhausted retries, dead-lettering"
        );
        let dead = message.encode().unwrap_or(payload);
        if let Err(e) = queue.dead_letter(dead).await {
            error!(icao24 = %icao24, error = %e, "Dead-letter push failed, message dropped");
        }
        pipeline.events().emit(FusionEvent::MessageDeadLettered {
            icao24,
            attempts: message.attempts,
            timestamp: Utc::now(),
        });
        return;
    }

    let delay = retry_delay(config.retry_backoff, message.attempts);
    debug!(
        message_id = %message.id,
        icao24 = %icao24,
        attempt = message.attempts,
        delay_ms = delay.as_millis() as u64,
        error = %e,
        "Requeueing failed message"
    );

    let encoded = match message.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(icao24 = %icao24, error = %e, "Requeue encode failed, message dropped");
            return;
        }
    };
    let queue = queue.clone();
    let cancel = cancel.clone();
    requeues.spawn(async move {
        // On shutdown, requeue immediately rather than lose the message
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        if let Err(e) = queue.push(vec![encoded]).await {
            error!(icao24 = %icao24, error = %e, "Requeue failed, message dropped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed_cache::DistributedCache;
    use crate::live_store::LiveStateStore;
    use crate::pipeline::test_support::RecordingStore;
    use crate::queue::{enqueue, MemoryQueue};
    use skyfuse_common::events::EventBus;
    use skyfuse_common::{AircraftSnapshot, SourceMeta};

    fn message(icao24: &str) -> IngestMessage {
        let meta = SourceMeta::new("feeder", 10, Utc::now());
        let mut snapshot = AircraftSnapshot::new(icao24, &meta);
        snapshot.latitude = Some(1.0);
        snapshot.longitude = Some(1.0);
        IngestMessage::new(snapshot)
    }

    fn config(max_retries: u32) -> WorkerConfig {
        WorkerConfig {
            workers: 2,
            pop_timeout: Duration::from_millis(20),
            max_retries,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn pipeline(store: Arc<RecordingStore>) -> Arc<FusionPipeline> {
        Arc::new(FusionPipeline::new(
            Arc::new(LiveStateStore::new(100, Duration::from_secs(600))),
            Arc::new(DistributedCache::disabled()),
            store,
            EventBus::new(16),
        ))
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_millis(250);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(250));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(500));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(1000));
        assert!(retry_delay(base, 100) >= retry_delay(base, 17));
    }

    #[tokio::test]
    async fn test_workers_apply_queued_messages() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());
        let cancel = CancellationToken::new();
        let handles = spawn_workers(queue.clone(), pipeline.clone(), config(3), cancel.clone());

        enqueue(queue.as_ref(), &[message("aaaaaa"), message("bbbbbb")])
            .await
            .unwrap();
        wait_until(|| async { store.upserts() == 2 }).await;
        assert!(pipeline.live().get("bbbbbb").await.is_some());

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dead_lettered() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(RecordingStore::default());
        store.fail_for("aaaaaa");
        let pipeline = pipeline(store.clone());
        let mut events = pipeline.events().subscribe();
        let cancel = CancellationToken::new();
        spawn_workers(queue.clone(), pipeline.clone(), config(2), cancel.clone());

        enqueue(queue.as_ref(), &[message("aaaaaa")]).await.unwrap();
        wait_until(|| async { queue.dead_letter_depth().await.unwrap() == 1 }).await;

        let dead = IngestMessage::decode(&queue.dead_letters().await[0]).unwrap();
        assert_eq!(dead.attempts, 3);
        assert_eq!(store.upserts(), 0);

        loop {
            if let FusionEvent::MessageDeadLettered { icao24, attempts, .. } =
                events.recv().await.unwrap()
            {
                assert_eq!(icao24, "aaaaaa");
                assert_eq!(attempts, 3);
                break;
            }
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(RecordingStore::default());
        store.fail_for("aaaaaa");
        let pipeline = pipeline(store.clone());
        let cancel = CancellationToken::new();
        let mut worker_config = config(5);
        worker_config.retry_backoff = Duration::from_millis(30);
        spawn_workers(queue.clone(), pipeline, worker_config, cancel.clone());

        enqueue(queue.as_ref(), &[message("aaaaaa")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        store.heal("aaaaaa");

        wait_until(|| async { store.upserts() == 1 }).await;
        assert_eq!(queue.dead_letter_depth().await.unwrap(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_requeues_message() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(RecordingStore::default());
        store.fail_for("aaaaaa");
        let cancel = CancellationToken::new();
        let mut worker_config = config(5);
        worker_config.retry_backoff = Duration::from_secs(30);
        let handles = spawn_workers(queue.clone(), pipeline(store), worker_config, cancel.clone());

        enqueue(queue.as_ref(), &[message("aaaaaa")]).await.unwrap();
        // Popped, failed once, now waiting out a 30s backoff
        wait_until(|| async { queue.depth().await.unwrap() == 0 }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.depth().await.unwrap(), 1);
        let requeued = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert!(IngestMessage::decode(&requeued).unwrap().attempts >= 1);
        assert_eq!(queue.dead_letter_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dead_lettered() {
        let queue = Arc::new(MemoryQueue::new());
        let cancel = CancellationToken::new();
        spawn_workers(
            queue.clone(),
            pipeline(Arc::new(RecordingStore::default())),
            config(3),
            cancel.clone(),
        );

        queue.push(vec!["not json".to_string()]).await.unwrap();
        wait_until(|| async { queue.dead_letter_depth().await.unwrap() == 1 }).await;
        cancel.cancel();
    }
}
