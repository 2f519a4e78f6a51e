//! Pipeline wiring: capture scheduler into the gated store, persisted
//! samples into the enrichment queue, everything reconciled through one
//! in-memory index.

use crate::cli::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, RgbaImage};
use retrace_events::{EventBus, RetraceEvent};
use retrace_storage::{
    CapabilityGate, DurableStore, EnrichmentState, ReconcilingIndex, Sample, SearchHit,
    StorageContainer, StorageError,
};
use retrace_vision::{
    CaptureConfig, CaptureScheduler, CaptureState, EnrichmentQueue, EnrichmentSink, SourceFactory,
    TextExtractor, DEFAULT_WORKERS,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Cadence of the periodic crash-safe index flush.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(300);

type DynStore = DurableStore<dyn StorageContainer>;

/// Adapter feeding enrichment results back into the in-memory index.
struct IndexSink {
    index: Arc<ReconcilingIndex>,
}

#[async_trait]
impl EnrichmentSink for IndexSink {
    fn is_done(&self, timestamp: DateTime<Utc>) -> bool {
        self.index.enrichment_state(timestamp) == Some(EnrichmentState::Done)
    }

    async fn complete(&self, timestamp: DateTime<Utc>, text: String) {
        self.index.attach_text(timestamp, text);
    }
}

/// Encode a captured frame as both variants; the store keeps the smaller.
pub fn encode_variants(image: &RgbaImage) -> Result<(Vec<u8>, Vec<u8>)> {
    let dynamic = DynamicImage::ImageRgba8(image.clone());

    let mut png = Vec::new();
    dynamic
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("png encoding failed")?;

    // JPEG has no alpha channel.
    let mut jpeg = Vec::new();
    dynamic
        .to_rgb8()
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .context("jpeg encoding failed")?;

    Ok((png, jpeg))
}

/// Running pipeline. Capture control, gesture recovery, search and flushing
/// all go through here.
pub struct RecorderHandle {
    scheduler: CaptureScheduler,
    container: Arc<dyn StorageContainer>,
    gate: Arc<CapabilityGate<dyn StorageContainer>>,
    store: Arc<DynStore>,
    index: Arc<ReconcilingIndex>,
    queue: Arc<EnrichmentQueue>,
    bus: EventBus,
    persist_task: tokio::task::JoinHandle<()>,
}

impl RecorderHandle {
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn capture_state(&self) -> CaptureState {
        self.scheduler.state()
    }

    pub fn index(&self) -> &Arc<ReconcilingIndex> {
        &self.index
    }

    pub fn search(&self, term: &str) -> Vec<SearchHit> {
        self.index.search(term)
    }

    /// A user interaction happened; attempt grant recovery off this call's
    /// context. Returns immediately, replay happens in the background.
    pub fn user_gesture(&self) {
        let gate = self.gate.clone();
        let store = self.store.clone();
        let index = self.index.clone();
        let container = self.container.clone();
        let queue = self.queue.clone();
        let bus = self.bus.clone();

        tokio::spawn(async move {
            let Some(ops) = gate.recover_on_gesture().await else {
                return;
            };
            let persisted = store.replay_pending(ops, &index.snapshot()).await;
            for sample in persisted {
                bus.send(RetraceEvent::SampleAdded {
                    timestamp: sample.timestamp,
                    media_ref: sample.media_ref.clone(),
                });
                index.add_sample(sample);
            }
            // Replayed samples land Pending; feed them to enrichment.
            enqueue_pending_enrichment(&container, &index, &queue).await;
        });
    }

    /// Flush the current index snapshot now, outside the periodic cadence.
    pub async fn flush_now(&self) -> Result<(), StorageError> {
        self.store.flush_index(&self.index.snapshot()).await
    }

    /// Stop capturing, drain frames already accepted into the persist
    /// channel, then write a final snapshot. Dropping the scheduler closes
    /// the channel, so joining the persist task is a full drain.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.scheduler.stop();
        let RecorderHandle {
            scheduler,
            store,
            index,
            persist_task,
            ..
        } = self;
        drop(scheduler);
        if tokio::time::timeout(std::time::Duration::from_secs(5), persist_task)
            .await
            .is_err()
        {
            warn!("persist task did not settle in time, flushing anyway");
        }
        store.flush_index(&index.snapshot()).await
    }
}

/// Load and reconcile durable state, then wire the full pipeline. The
/// scheduler is returned idle; call `start` on the handle to begin sampling.
pub async fn start_continuous_recording(
    config: &Config,
    container: Arc<dyn StorageContainer>,
    source_factory: Arc<SourceFactory>,
    extractor: Arc<dyn TextExtractor>,
    bus: EventBus,
) -> Result<RecorderHandle> {
    let gate = Arc::new(CapabilityGate::new(container.clone(), bus.clone()));
    let store = Arc::new(DurableStore::new(
        container.clone(),
        gate.clone(),
        bus.clone(),
    ));

    let loaded = store
        .load_index()
        .await
        .context("storage grant unavailable at startup")?
        .unwrap_or_default();
    let index = Arc::new(ReconcilingIndex::new(loaded));

    let entries = container
        .list_entries()
        .await
        .context("listing storage entries failed")?;
    let reconstructed = index.reconcile(&entries);
    info!(
        samples = index.sample_count(),
        reconstructed, "index loaded and reconciled"
    );

    let sink = Arc::new(IndexSink {
        index: index.clone(),
    });
    let queue = Arc::new(EnrichmentQueue::new(
        extractor,
        sink,
        config.language,
        config.max_raster_dimension,
        DEFAULT_WORKERS,
        bus.clone(),
    ));

    // Catch up on samples persisted before a previous shutdown finished
    // enriching them.
    {
        let container = container.clone();
        let index = index.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            enqueue_pending_enrichment(&container, &index, &queue).await;
        });
    }

    let (candidate_tx, candidate_rx) = mpsc::channel(16);
    let scheduler = CaptureScheduler::new(
        source_factory,
        CaptureConfig {
            sample_interval: config.sample_interval,
            diff_threshold: config.diff_threshold,
        },
        candidate_tx,
        bus.clone(),
    );

    let persist_task = spawn_persist_task(
        candidate_rx,
        store.clone(),
        index.clone(),
        queue.clone(),
        bus.clone(),
    );
    spawn_flush_task(store.clone(), index.clone());

    Ok(RecorderHandle {
        scheduler,
        container,
        gate,
        store,
        index,
        queue,
        bus,
        persist_task,
    })
}

fn spawn_persist_task(
    mut candidate_rx: mpsc::Receiver<retrace_vision::CandidateFrame>,
    store: Arc<DynStore>,
    index: Arc<ReconcilingIndex>,
    queue: Arc<EnrichmentQueue>,
    bus: EventBus,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = candidate_rx.recv().await {
            let mut sample = Sample::new(frame.timestamp);

            let (png, jpeg) = match encode_variants(&frame.image) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "dropping frame that failed to encode");
                    continue;
                }
            };

            match store.persist_sample(&sample, &png, &jpeg).await {
                Ok(media_ref) => {
                    sample.media_ref = media_ref.clone();
                    let timestamp = sample.timestamp;
                    index.add_sample(sample);
                    bus.send(RetraceEvent::SampleAdded {
                        timestamp,
                        media_ref,
                    });
                    queue.enqueue(timestamp, DynamicImage::ImageRgba8(frame.image));
                }
                Err(StorageError::CapabilityUnavailable) => {
                    debug!("sample write deferred until grant recovery");
                }
                Err(e) => {
                    warn!(error = %e, "sample write failed");
                    bus.send(RetraceEvent::PersistenceFailed {
                        detail: e.to_string(),
                    });
                }
            }
        }
    })
}

fn spawn_flush_task(store: Arc<DynStore>, index: Arc<ReconcilingIndex>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = store.flush_index(&index.snapshot()).await {
                debug!(error = %e, "periodic index flush failed");
            }
        }
    });
}

/// Read back the media file of every still-pending sample and queue it for
/// extraction. Used at startup and after gesture replay.
async fn enqueue_pending_enrichment(
    container: &Arc<dyn StorageContainer>,
    index: &Arc<ReconcilingIndex>,
    queue: &Arc<EnrichmentQueue>,
) {
    for sample in index.pending_samples() {
        if sample.media_ref.is_empty() {
            continue;
        }
        let bytes = match container.read_file(&sample.media_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(media = %sample.media_ref, error = %e, "pending sample media unreadable");
                continue;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(image) => {
                queue.enqueue(sample.timestamp, image);
            }
            Err(e) => {
                debug!(media = %sample.media_ref, error = %e, "pending sample media undecodable");
            }
        }
    }
}
