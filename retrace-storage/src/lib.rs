mod container;
mod gate;
mod index;
mod media;
mod memory;
mod store;
mod types;
mod writer;

pub use container::{AccessMode, EntryInfo, LocalDirContainer, StorageContainer};
pub use gate::{CapabilityGate, PENDING_QUEUE_CAP, REPLAY_LIMIT};
pub use index::{ReconcilingIndex, SearchHit};
pub use media::{format_media_name, is_media_name, parse_media_name, MediaKind};
pub use memory::MemoryContainer;
pub use store::DurableStore;
pub use types::{
    summary_id, truncate_to_millis, EnrichmentState, GrantState, Index, PendingKind,
    PendingOperation, Sample, StorageError, Summary,
};
pub use writer::{read_snapshot, write_snapshot, BACKUP_NAME, INDEX_NAME, TEMP_NAME};
