//! Durable store: per-sample raster writes and the serialized index flush,
//! every container call wrapped by the capability gate.

use crate::container::StorageContainer;
use crate::gate::CapabilityGate;
use crate::media::{format_media_name, MediaKind};
use crate::types::{Index, PendingKind, PendingOperation, Sample, StorageError};
use crate::writer;
use retrace_events::{EventBus, RetraceEvent};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct DurableStore<C: StorageContainer + ?Sized> {
    container: Arc<C>,
    gate: Arc<CapabilityGate<C>>,
    /// Serializes the snapshot protocol; concurrent flushes racing through
    /// its copy ordering would corrupt the backup/commit sequence.
    flush_lock: Mutex<()>,
    bus: EventBus,
}

impl<C: StorageContainer + ?Sized> DurableStore<C> {
    pub fn new(container: Arc<C>, gate: Arc<CapabilityGate<C>>, bus: EventBus) -> Self {
        Self {
            container,
            gate,
            flush_lock: Mutex::new(()),
            bus,
        }
    }

    pub fn gate(&self) -> &Arc<CapabilityGate<C>> {
        &self.gate
    }

    pub fn container(&self) -> &Arc<C> {
        &self.container
    }

    /// Write one sample's raster. Both encoded variants are written, then
    /// the larger is deleted so exactly one immutable file remains per
    /// sample. Returns the kept media name.
    ///
    /// While the grant is lost the write is queued for gesture replay and
    /// `CapabilityUnavailable` is returned so the caller knows nothing
    /// landed yet.
    pub async fn persist_sample(
        &self,
        sample: &Sample,
        png: &[u8],
        jpeg: &[u8],
    ) -> Result<String, StorageError> {
        if let Err(e) = self.gate.ensure_active() {
            self.gate.enqueue_pending(PendingOperation::persist_sample(
                sample.clone(),
                png.to_vec(),
                jpeg.to_vec(),
            ));
            return Err(e);
        }

        match self.write_sample_files(sample, png, jpeg).await {
            Ok(name) => Ok(name),
            Err(StorageError::CapabilityUnavailable) => {
                // Grant vanished between the probe and the write.
                self.gate.mark_lost();
                self.gate.enqueue_pending(PendingOperation::persist_sample(
                    sample.clone(),
                    png.to_vec(),
                    jpeg.to_vec(),
                ));
                Err(StorageError::CapabilityUnavailable)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_sample_files(
        &self,
        sample: &Sample,
        png: &[u8],
        jpeg: &[u8],
    ) -> Result<String, StorageError> {
        let png_name = format_media_name(sample.timestamp, MediaKind::Png);
        let jpeg_name = format_media_name(sample.timestamp, MediaKind::Jpeg);

        self.container.write_file(&png_name, png, true).await?;
        self.container.write_file(&jpeg_name, jpeg, true).await?;

        let (kept, dropped) = if png.len() > jpeg.len() {
            (jpeg_name, png_name)
        } else {
            (png_name, jpeg_name)
        };
        self.container.delete_file(&dropped).await?;
        debug!(media = %kept, "sample raster persisted, larger variant dropped");
        Ok(kept)
    }

    /// Flush the full index through the crash-safe snapshot protocol.
    /// Serialized per container; a failed flush is abandoned and the next
    /// one supersedes it.
    pub async fn flush_index(&self, index: &Index) -> Result<(), StorageError> {
        let _guard = self.flush_lock.lock().await;

        if let Err(e) = self.gate.ensure_active() {
            self.gate.enqueue_pending(PendingOperation::flush_index());
            return Err(e);
        }

        match writer::write_snapshot(self.container.as_ref(), index).await {
            Ok(()) => Ok(()),
            Err(StorageError::CapabilityUnavailable) => {
                self.gate.mark_lost();
                self.gate.enqueue_pending(PendingOperation::flush_index());
                Err(StorageError::CapabilityUnavailable)
            }
            Err(e) => {
                self.bus.send(RetraceEvent::PersistenceFailed {
                    detail: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Load the most recent complete index snapshot, if any.
    pub async fn load_index(&self) -> Result<Option<Index>, StorageError> {
        self.gate.ensure_active()?;
        writer::read_snapshot(self.container.as_ref()).await
    }

    /// Replay deferred writes handed back by the gate after a gesture
    /// recovery, preserving their enqueue order. The latest index snapshot
    /// is flushed at most once, after any replayed sample writes.
    pub async fn replay_pending(
        &self,
        ops: Vec<PendingOperation>,
        index: &Index,
    ) -> Vec<Sample> {
        let mut flush_needed = false;
        let mut persisted = Vec::new();

        for op in ops {
            match op.kind {
                PendingKind::PersistSample { mut sample, png, jpeg } => {
                    match self.persist_sample(&sample, &png, &jpeg).await {
                        Ok(name) => {
                            sample.media_ref = name;
                            persisted.push(sample);
                        }
                        Err(e) => {
                            debug!(error = %e, "replayed sample write failed, dropping");
                        }
                    }
                }
                PendingKind::FlushIndex => flush_needed = true,
            }
        }

        if flush_needed {
            if let Err(e) = self.flush_index(index).await {
                debug!(error = %e, "replayed index flush failed");
            }
        }

        if !persisted.is_empty() {
            info!(count = persisted.len(), "replayed deferred sample writes");
        }
        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryContainer;
    use chrono::Utc;

    fn store_over(
        container: Arc<MemoryContainer>,
    ) -> DurableStore<MemoryContainer> {
        let bus = EventBus::default();
        let gate = Arc::new(CapabilityGate::new(container.clone(), bus.clone()));
        DurableStore::new(container, gate, bus)
    }

    #[tokio::test]
    async fn keeps_exactly_one_variant_per_sample() {
        let container = Arc::new(MemoryContainer::new());
        let store = store_over(container.clone());
        let sample = Sample::new(Utc::now());

        // jpeg smaller: jpeg kept
        let kept = store
            .persist_sample(&sample, &[0u8; 100], &[0u8; 10])
            .await
            .unwrap();
        assert!(kept.ends_with(".jpg"));
        assert_eq!(container.entry_names().len(), 1);

        // png smaller or equal: png kept
        let sample2 = Sample::new(Utc::now() + chrono::Duration::seconds(1));
        let kept2 = store
            .persist_sample(&sample2, &[0u8; 10], &[0u8; 10])
            .await
            .unwrap();
        assert!(kept2.ends_with(".png"));
        assert_eq!(container.entry_names().len(), 2);
    }

    #[tokio::test]
    async fn lost_grant_queues_sample_writes() {
        let container = Arc::new(MemoryContainer::new());
        let store = store_over(container.clone());
        container.set_granted(false);

        let sample = Sample::new(Utc::now());
        let err = store
            .persist_sample(&sample, &[1, 2, 3], &[1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CapabilityUnavailable));
        assert_eq!(store.gate().pending_len(), 1);
        assert!(container.entry_names().is_empty());
    }

    #[tokio::test]
    async fn flush_and_load_round_trip() {
        let container = Arc::new(MemoryContainer::new());
        let store = store_over(container.clone());

        let mut index = Index::default();
        let sample = Sample::new(Utc::now());
        index.samples.insert(sample.timestamp, sample);

        store.flush_index(&index).await.unwrap();
        let loaded = store.load_index().await.unwrap().unwrap();
        assert_eq!(loaded.samples.len(), 1);
    }

    #[tokio::test]
    async fn replay_persists_in_enqueue_order() {
        let container = Arc::new(MemoryContainer::new());
        let store = store_over(container.clone());
        container.set_granted(false);

        let t0 = Utc::now();
        for i in 0..3 {
            let sample = Sample::new(t0 + chrono::Duration::seconds(i));
            let _ = store.persist_sample(&sample, &[0u8; 4], &[0u8; 2]).await;
        }
        assert_eq!(store.gate().pending_len(), 3);

        container.set_granted(true);
        let ops = store.gate().recover_on_gesture().await.unwrap();
        let persisted = store.replay_pending(ops, &Index::default()).await;

        assert_eq!(persisted.len(), 3);
        let times: Vec<_> = persisted.iter().map(|s| s.timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(container.entry_names().len(), 3);
    }
}
