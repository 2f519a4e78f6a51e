//! Typed event bus decoupling the capture/persistence core from any UI.
//!
//! The core publishes [`RetraceEvent`]s over a broadcast channel; subscribers
//! (frontends, notification surfaces, tests) consume them without the core
//! knowing who is listening. Sending never blocks and a send with no live
//! receivers is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Events emitted by the capture-diff-persist-enrich pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RetraceEvent {
    /// A perceptually distinct frame was accepted and persisted.
    SampleAdded {
        timestamp: DateTime<Utc>,
        media_ref: String,
    },
    /// A grabbed frame was too similar to the last accepted one.
    /// Emitted every tenth consecutive skip to keep the stream quiet.
    SamplesSkipped { count: u64 },
    /// The capture scheduler changed state.
    CaptureStateChanged { state: String },
    /// The storage grant vanished; writes are being queued.
    CapabilityLost,
    /// The storage grant came back; `replayed` queued writes were drained.
    CapabilityRestored { replayed: usize },
    /// Text extraction finished for a sample (possibly with empty text).
    EnrichmentCompleted {
        timestamp: DateTime<Utc>,
        text_len: usize,
    },
    /// A store write failed for a reason other than a lost grant.
    PersistenceFailed { detail: String },
    /// A summary span was written to the index.
    SummaryAdded { id: String },
}

/// Cloneable handle to the broadcast channel carrying [`RetraceEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RetraceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Lagging or absent receivers are ignored.
    pub fn send(&self, event: RetraceEvent) {
        if self.sender.send(event).is_err() {
            trace!("event dropped: no active subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RetraceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
