//! Refreshed-snapshot broadcast
//!
//! Every merged snapshot is published on an [`EventBus`]. The push transport
//! (an external collaborator) subscribes and forwards updates to connected
//! map clients; with no subscribers, events are simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::snapshot::AircraftSnapshot;

/// Events emitted by the fusion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FusionEvent {
    /// A snapshot changed after merging an incoming report
    SnapshotUpdated {
        snapshot: Box<AircraftSnapshot>,
        timestamp: DateTime<Utc>,
    },
    /// A queued message exhausted its retries and was dead-lettered
    MessageDeadLettered {
        icao24: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast channel wrapper shared by producers and subscribers
///
/// Cloning is cheap; all clones publish to the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FusionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FusionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; returns the number of subscribers reached (0 when
    /// nobody is listening)
    pub fn emit(&self, event: FusionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn publish_snapshot(&self, snapshot: &AircraftSnapshot) -> usize {
        self.emit(FusionEvent::SnapshotUpdated {
            snapshot: Box::new(snapshot.clone()),
            timestamp: Utc::now(),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
