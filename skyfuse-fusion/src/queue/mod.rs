//! Ingestion Queue
//!
//! Buffers merge inputs between producers (feeder posts, provider
//! refreshes) and the merge-and-persist path. Producers push serialized
//! [`IngestMessage`]s; a pool of workers pops them and runs each through
//! [`FusionPipeline::apply`](crate::pipeline::FusionPipeline::apply).
//!
//! Failed messages are re-enqueued after exponential backoff, up to
//! `max_retries` attempts, then moved to a dead-letter list.

mod memory;
mod redis_list;
mod worker;

pub use memory::MemoryQueue;
pub use redis_list::RedisListQueue;
pub use worker::{spawn_workers, WorkerConfig};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyfuse_common::AircraftSnapshot;
use uuid::Uuid;

use crate::error::Result;

/// One queued merge input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestMessage {
    /// Stable across retries; correlates requeue and dead-letter logs
    pub id: Uuid,
    /// Normalized report, already stamped with source, priority and
    /// ingestion time
    pub snapshot: AircraftSnapshot,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl IngestMessage {
    pub fn new(snapshot: AircraftSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Backend name for logs and stats
    fn name(&self) -> &'static str;

    /// Push payloads; no-op on empty input
    async fn push(&self, payloads: Vec<String>) -> Result<()>;

    /// Block up to `timeout` for the next payload
    async fn pop(&self, timeout: Duration) -> Result<Option<String>>;

    async fn dead_letter(&self, payload: String) -> Result<()>;

    async fn depth(&self) -> Result<usize>;

    async fn dead_letter_depth(&self) -> Result<usize>;
}

/// Encode and push messages in one backend call
pub async fn enqueue(queue: &dyn QueueBackend, messages: &[IngestMessage]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    let payloads = messages
        .iter()
        .map(IngestMessage::encode)
        .collect::<Result<Vec<_>>>()?;
    queue.push(payloads).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfuse_common::SourceMeta;

    #[tokio::test]
    async fn test_enqueue_empty_is_noop() {
        let queue = MemoryQueue::new();
        enqueue(&queue, &[]).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_then_pop_preserves_message() {
        let queue = MemoryQueue::new();
        let meta = SourceMeta::new("feeder", 10, Utc::now());
        let message = IngestMessage::new(AircraftSnapshot::new("a1b2c3", &meta));
        enqueue(&queue, std::slice::from_ref(&message)).await.unwrap();

        let payload = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(IngestMessage::decode(&payload).unwrap(), message);
    }
}
