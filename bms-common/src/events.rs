//! Ingest progress events
//!
//! Batch progress is broadcast over a tokio broadcast channel so a CLI,
//! dashboard bridge, or test can observe a run without the pipeline knowing
//! who is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a batch is ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// Batch partitioned and about to run
    BatchStarted {
        batch_id: Uuid,
        total: usize,
        to_process: usize,
        timestamp: DateTime<Utc>,
    },

    /// One screenshot finished (any outcome)
    ItemCompleted {
        batch_id: Uuid,
        file_name: String,
        /// Short outcome label ("processed", "updated", "failed", ...)
        outcome: String,
        completed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Adaptive executor changed its concurrency level
    ConcurrencyChanged {
        batch_id: Uuid,
        from: usize,
        to: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch finished
    BatchCompleted {
        batch_id: Uuid,
        processed: usize,
        updated: usize,
        skipped: usize,
        rejected: usize,
        errored: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`IngestEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Err` if nobody is subscribed.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the case where nobody is listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
