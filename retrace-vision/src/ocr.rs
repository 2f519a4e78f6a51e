//! Asynchronous text-enrichment queue.
//!
//! Jobs are fire-and-forget relative to the sampling loop: bounded by a
//! worker-pool semaphore, deduplicated against durable state first and an
//! in-flight registry second, downscaled before analysis to bound worker
//! memory, and retried with progressively smaller dimensions on resource
//! exhaustion. A language that fails to load is remembered for the whole
//! process and extraction falls back once to the default language. Whatever
//! text results, possibly empty, is written back exactly once.

use crate::language::Language;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{imageops::FilterType, DynamicImage};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use retrace_events::{EventBus, RetraceEvent};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Resource-exhaustion retries per job; each retry halves the bound.
const RESOURCE_RETRY_CAP: u32 = 3;
/// Floor for the downscale bound so retries stay meaningful.
const MIN_RETRY_DIMENSION: u32 = 64;

pub const DEFAULT_MAX_DIMENSION: u32 = 1600;
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// Worker ran out of memory or similar; retried at smaller dimensions.
    #[error("extraction resource exhaustion: {0}")]
    Resource(String),

    /// Language data failed to load; cached as failed for the process.
    #[error("extraction language unavailable: {0}")]
    Language(String),

    #[error("extraction failed: {0}")]
    Other(String),
}

/// Text-extraction backend seam.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        image: &DynamicImage,
        language: Language,
    ) -> Result<String, ExtractError>;
}

/// Where completed extractions land. `is_done` consults durable state so
/// dedup survives a restart; `complete` records the text exactly once.
#[async_trait]
pub trait EnrichmentSink: Send + Sync {
    fn is_done(&self, timestamp: DateTime<Utc>) -> bool;
    async fn complete(&self, timestamp: DateTime<Utc>, text: String);
}

/// Languages whose data failed to load, remembered process-wide so a broken
/// language is not re-attempted for every sample.
static FAILED_LANGUAGES: Lazy<RwLock<HashSet<Language>>> =
    Lazy::new(|| RwLock::new(HashSet::new()));

/// Bound both dimensions to `max_dimension`, preserving aspect ratio.
/// Images already under the bound are returned untouched.
pub fn downscale_to_fit(image: &DynamicImage, max_dimension: u32) -> DynamicImage {
    if image.width() <= max_dimension && image.height() <= max_dimension {
        image.clone()
    } else {
        image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    }
}

pub struct EnrichmentQueue {
    extractor: Arc<dyn TextExtractor>,
    sink: Arc<dyn EnrichmentSink>,
    language: Language,
    max_dimension: u32,
    workers: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    bus: EventBus,
}

impl EnrichmentQueue {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        sink: Arc<dyn EnrichmentSink>,
        language: Language,
        max_dimension: u32,
        workers: usize,
        bus: EventBus,
    ) -> Self {
        Self {
            extractor,
            sink,
            language,
            max_dimension,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            bus,
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Schedule extraction for a persisted sample. Skipped when durable
    /// state already says `Done` or a job for the same timestamp is in
    /// flight. Returns whether a job was actually spawned.
    pub fn enqueue(&self, timestamp: DateTime<Utc>, image: DynamicImage) -> bool {
        if self.sink.is_done(timestamp) {
            debug!(%timestamp, "sample already enriched, skipping");
            return false;
        }

        let key = timestamp.timestamp_millis();
        if !self.in_flight.lock().insert(key) {
            debug!(%timestamp, "enrichment already in flight, skipping");
            return false;
        }

        let extractor = self.extractor.clone();
        let sink = self.sink.clone();
        let language = self.language;
        let max_dimension = self.max_dimension;
        let workers = self.workers.clone();
        let in_flight = self.in_flight.clone();
        let bus = self.bus.clone();

        tokio::spawn(async move {
            // Removed on every exit path, including panics.
            let _guard = InFlightGuard { in_flight, key };
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let text =
                run_extraction(&*extractor, image, language, max_dimension, &FAILED_LANGUAGES)
                    .await;
            let text_len = text.len();
            sink.complete(timestamp, text).await;
            bus.send(RetraceEvent::EnrichmentCompleted {
                timestamp,
                text_len,
            });
        });
        true
    }
}

struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<i64>>>,
    key: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

/// One extraction job. Never fails: every failure mode degrades to empty
/// text so the sample still ends `Done` and the queue drains.
async fn run_extraction(
    extractor: &dyn TextExtractor,
    image: DynamicImage,
    requested: Language,
    max_dimension: u32,
    failed_cache: &RwLock<HashSet<Language>>,
) -> String {
    let mut language = requested;
    let mut fallback_used = false;

    // A language already known bad goes straight to the fallback.
    if failed_cache.read().contains(&language) {
        if language == Language::FALLBACK || failed_cache.read().contains(&Language::FALLBACK) {
            warn!(%language, "no usable extraction language, storing empty text");
            return String::new();
        }
        debug!(%language, "language previously failed, using fallback");
        language = Language::FALLBACK;
        fallback_used = true;
    }

    let mut bound = max_dimension;
    let mut scaled = downscale_to_fit(&image, bound);
    let mut resource_retries = 0u32;

    loop {
        match extractor.extract(&scaled, language).await {
            Ok(text) => return text,
            Err(ExtractError::Resource(e)) => {
                if resource_retries >= RESOURCE_RETRY_CAP {
                    warn!(error = %e, "extraction kept exhausting resources, storing empty text");
                    return String::new();
                }
                resource_retries += 1;
                bound = (bound / 2).max(MIN_RETRY_DIMENSION);
                scaled = downscale_to_fit(&scaled, bound);
                debug!(retry = resource_retries, bound, "retrying extraction downscaled");
            }
            Err(ExtractError::Language(e)) => {
                warn!(%language, error = %e, "extraction language unavailable");
                failed_cache.write().insert(language);
                if !fallback_used && language != Language::FALLBACK {
                    fallback_used = true;
                    language = Language::FALLBACK;
                    continue;
                }
                return String::new();
            }
            Err(ExtractError::Other(e)) => {
                warn!(error = %e, "extraction failed, storing empty text");
                return String::new();
            }
        }
    }
}
