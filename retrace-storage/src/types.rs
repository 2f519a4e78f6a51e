use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by container access and the durable store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The store grant is missing or was revoked mid-operation.
    #[error("storage capability unavailable")]
    CapabilityUnavailable,

    /// Named entry does not exist in the container.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying read/write/delete failure.
    #[error("container io error: {0}")]
    Io(String),

    /// A snapshot existed but did not parse as a complete index.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Enrichment lifecycle of a sample's extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentState {
    #[default]
    Pending,
    Done,
    Failed,
}

/// One accepted capture. The timestamp is the primary key within a store and
/// never changes after creation; `extracted_text` and `enrichment` are
/// mutated exactly once, by the enrichment queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Name of the stored raster file, resolved lazily to displayable bytes.
    pub media_ref: String,
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default)]
    pub enrichment: EnrichmentState,
    /// True when the timestamp was re-derived from file modification time
    /// during reconciliation instead of the canonical filename.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reconstructed: bool,
}

impl Sample {
    /// Create a pending sample. The timestamp is truncated to millisecond
    /// precision so the media filename mapping round-trips exactly.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: truncate_to_millis(timestamp),
            media_ref: String::new(),
            extracted_text: String::new(),
            enrichment: EnrichmentState::Pending,
            reconstructed: false,
        }
    }
}

/// Derived record covering a time span of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub text: String,
}

impl Summary {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>, text: String) -> Self {
        debug_assert!(start_time <= end_time);
        Self {
            id: summary_id(start_time, end_time),
            start_time,
            end_time,
            text,
        }
    }
}

/// Deterministic summary id: a pure function of the span, so re-summarizing
/// the same window overwrites instead of duplicating.
pub fn summary_id(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> String {
    format!("{}_{}", start_time.to_rfc3339(), end_time.to_rfc3339())
}

pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .unwrap_or(ts)
}

/// Grant state of the external store handle. Mutated only by the
/// capability gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    Active,
    Lost,
    PendingRecovery,
}

/// A write deferred while the grant is lost, replayed on recovery.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub kind: PendingKind,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum PendingKind {
    PersistSample {
        sample: Sample,
        png: Vec<u8>,
        jpeg: Vec<u8>,
    },
    FlushIndex,
}

impl PendingOperation {
    pub fn persist_sample(sample: Sample, png: Vec<u8>, jpeg: Vec<u8>) -> Self {
        Self {
            kind: PendingKind::PersistSample { sample, png, jpeg },
            enqueued_at: Utc::now(),
        }
    }

    pub fn flush_index() -> Self {
        Self {
            kind: PendingKind::FlushIndex,
            enqueued_at: Utc::now(),
        }
    }
}

/// Full set of samples and summaries, mirrored between memory and the
/// committed snapshot in the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub samples: BTreeMap<DateTime<Utc>, Sample>,
    #[serde(default)]
    pub summaries: BTreeMap<String, Summary>,
}
