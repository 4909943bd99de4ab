//! Ingest strategy
//!
//! Whether accepted snapshots go through the queue or straight into the
//! pipeline is decided once at startup. Handlers only see [`IngestSink`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use skyfuse_common::AircraftSnapshot;
use tracing::warn;

use crate::pipeline::{BatchReport, FusionPipeline};
use crate::queue::{enqueue, IngestMessage, QueueBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Direct,
    Queued,
}

#[async_trait]
pub trait IngestSink: Send + Sync {
    fn mode(&self) -> IngestMode;

    /// Hand off validated snapshots; per-item failures land in the report
    async fn submit(&self, snapshots: Vec<AircraftSnapshot>) -> BatchReport;

    /// Queue used by this sink, if any
    fn queue(&self) -> Option<&Arc<dyn QueueBackend>> {
        None
    }
}

/// Merge and persist inline
pub struct DirectIngest {
    pipeline: Arc<FusionPipeline>,
}

impl DirectIngest {
    pub fn new(pipeline: Arc<FusionPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl IngestSink for DirectIngest {
    fn mode(&self) -> IngestMode {
        IngestMode::Direct
    }

    async fn submit(&self, snapshots: Vec<AircraftSnapshot>) -> BatchReport {
        self.pipeline.process_batch(snapshots).await
    }
}

/// Enqueue for the worker pool, falling back to the direct path when the
/// queue cannot take the batch
pub struct QueuedIngest {
    queue: Arc<dyn QueueBackend>,
    fallback: DirectIngest,
}

impl QueuedIngest {
    pub fn new(queue: Arc<dyn QueueBackend>, pipeline: Arc<FusionPipeline>) -> Self {
        Self {
            queue,
            fallback: DirectIngest::new(pipeline),
        }
    }
}

#[async_trait]
impl IngestSink for QueuedIngest {
    fn mode(&self) -> IngestMode {
        IngestMode::Queued
    }

    async fn submit(&self, snapshots: Vec<AircraftSnapshot>) -> BatchReport {
        if snapshots.is_empty() {
            return BatchReport::default();
        }
        let messages: Vec<IngestMessage> = snapshots
            .iter()
            .cloned()
            .map(IngestMessage::new)
            .collect();

        match enqueue(self.queue.as_ref(), &messages).await {
            Ok(()) => BatchReport {
                processed: messages.len(),
                errors: Vec::new(),
            },
            Err(e) => {
                warn!(
                    backend = self.queue.name(),
                    count = snapshots.len(),
                    error = %e,
                    "Queue unavailable, writing directly"
                );
                self.fallback.submit(snapshots).await
            }
        }
    }

    fn queue(&self) -> Option<&Arc<dyn QueueBackend>> {
        Some(&self.queue)
    }
}
