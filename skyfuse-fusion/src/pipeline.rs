//! Merge-and-persist path
//!
//! [`FusionPipeline::apply`] is the per-snapshot unit of work shared by the
//! direct ingest path and the queue workers:
//!
//! 1. Pick the existing snapshot: live store entry, else distributed cache
//!    entry (short timeout, a miss on timeout).
//! 2. Merge into the live store.
//! 3. Upsert the merged snapshot into the durable store (awaited; failure
//!    fails the item).
//! 4. Write the distributed cache in the background.
//! 5. Publish the merged snapshot on the event bus.
//!
//! Re-applying the same report is idempotent: an equal-priority report with
//! an equal ingestion time never wins the merge, so a retry only repeats the
//! durable upsert.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use skyfuse_common::events::EventBus;
use skyfuse_common::normalizer::ValidationError;
use skyfuse_common::AircraftSnapshot;
use tracing::{debug, warn};

use crate::db::SnapshotStore;
use crate::distributed_cache::DistributedCache;
use crate::error::Result;
use crate::live_store::LiveStateStore;

/// Outcome of one ingest call: successes are counted, failures listed
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

impl BatchReport {
    pub fn extend(&mut self, other: BatchReport) {
        self.processed += other.processed;
        self.errors.extend(other.errors);
    }
}

pub struct FusionPipeline {
    live: Arc<LiveStateStore>,
    cache: Arc<DistributedCache>,
    store: Arc<dyn SnapshotStore>,
    events: EventBus,
    chunk_size: usize,
    chunk_parallelism: usize,
}

impl FusionPipeline {
    pub fn new(
        live: Arc<LiveStateStore>,
        cache: Arc<DistributedCache>,
        store: Arc<dyn SnapshotStore>,
        events: EventBus,
    ) -> Self {
        Self {
            live,
            cache,
            store,
            events,
            chunk_size: 10,
            chunk_parallelism: 1,
        }
    }

    /// Sub-batch size and how many sub-batches run at once
    pub fn with_chunking(mut self, chunk_size: usize, chunk_parallelism: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_parallelism = chunk_parallelism.max(1);
        self
    }

    pub fn live(&self) -> &Arc<LiveStateStore> {
        &self.live
    }

    pub fn cache(&self) -> &Arc<DistributedCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn apply(&self, incoming: AircraftSnapshot) -> Result<AircraftSnapshot> {
        let seed = if self.live.get(&incoming.icao24).await.is_none() {
            self.cache.get(&incoming.icao24).await
        } else {
            None
        };

        let merged = self.live.upsert_seeded(incoming, seed.as_ref()).await;
        self.store.upsert(&merged).await?;
        self.cache.spawn_put(merged.clone());
        self.events.publish_snapshot(&merged);

        debug!(
            icao24 = %merged.icao24,
            source = %merged.data_source,
            "Applied snapshot"
        );
        Ok(merged)
    }

    /// Apply every snapshot in fixed-size sub-batches. Different aircraft in
    /// a sub-batch run concurrently and settle independently; one failure
    /// never aborts the rest. Reports for the same aircraft apply in arrival
    /// order so the durable row always holds the latest merge.
    pub async fn process_batch(&self, snapshots: Vec<AircraftSnapshot>) -> BatchReport {
        let chunks: Vec<Vec<AircraftSnapshot>> = snapshots
            .chunks(self.chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let chunk_reports: Vec<BatchReport> = stream::iter(chunks)
            .map(|chunk| async move {
                let outcomes = join_all(group_by_aircraft(chunk).into_iter().map(
                    |group| async move {
                        let mut results = Vec::with_capacity(group.len());
                        for snapshot in group {
                            let icao24 = snapshot.icao24.clone();
                            results.push(self.apply(snapshot).await.map_err(|e| (icao24, e)));
                        }
                        results
                    },
                ))
                .await;

                let mut report = BatchReport::default();
                for outcome in outcomes.into_iter().flatten() {
                    match outcome {
                        Ok(_) => report.processed += 1,
                        Err((icao24, e)) => {
                            warn!(icao24 = %icao24, error = %e, "Snapshot processing failed");
                            report.errors.push(ValidationError::new(
                                icao24,
                                format!("processing failed: {}", e),
                            ));
                        }
                    }
                }
                report
            })
            .buffer_unordered(self.chunk_parallelism)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for chunk_report in chunk_reports {
            report.extend(chunk_report);
        }
        report
    }
}

/// Split a chunk into per-aircraft runs, keeping arrival order within each
fn group_by_aircraft(chunk: Vec<AircraftSnapshot>) -> Vec<Vec<AircraftSnapshot>> {
    let mut groups: Vec<Vec<AircraftSnapshot>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for snapshot in chunk {
        match index.get(&snapshot.icao24) {
            Some(&i) => groups[i].push(snapshot),
            None => {
                index.insert(snapshot.icao24.clone(), groups.len());
                groups.push(vec![snapshot]);
            }
        }
    }
    groups
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use skyfuse_common::{AircraftSnapshot, Bounds};

    use crate::db::SnapshotStore;
    use crate::error::{Error, Result};

    /// In-memory durable store that can be told to reject given icao24s
    #[derive(Default)]
    pub struct RecordingStore {
        pub rows: Mutex<Vec<AircraftSnapshot>>,
        pub failing: Mutex<HashSet<String>>,
    }

    impl RecordingStore {
        pub fn fail_for(&self, icao24: &str) {
            self.failing.lock().unwrap().insert(icao24.to_string());
        }

        pub fn heal(&self, icao24: &str) {
            self.failing.lock().unwrap().remove(icao24);
        }

        pub fn upserts(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SnapshotStore for RecordingStore {
        async fn upsert(&self, snapshot: &AircraftSnapshot) -> Result<()> {
            if self.failing.lock().unwrap().contains(&snapshot.icao24) {
                return Err(Error::Unavailable("store rejected write".to_string()));
            }
            self.rows.lock().unwrap().push(snapshot.clone());
            Ok(())
        }

        async fn get(&self, icao24: &str) -> Result<Option<AircraftSnapshot>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| s.icao24 == icao24)
                .cloned())
        }

        async fn find_by_identifier(&self, _ident: &str) -> Result<Option<AircraftSnapshot>> {
            Ok(None)
        }

        async fn query_bounds(
            &self,
            bounds: &Bounds,
            _since: DateTime<Utc>,
        ) -> Result<Vec<AircraftSnapshot>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|s| bounds.contains_snapshot(s))
                .cloned()
                .collect())
        }
    }
}
