//! Crash-safe snapshot protocol for the index file.
//!
//! The container has no atomic rename, only whole-content read/write/delete,
//! so atomicity is synthesized by copy ordering:
//!
//! 1. serialize the full index to the temp name;
//! 2. if a committed file exists, copy it to the backup name (overwriting
//!    any prior backup), then remove the committed file;
//! 3. copy the temp file's contents into the committed name, then delete
//!    the temp file.
//!
//! After an interruption at any point, at least one of
//! {committed, backup, temp} is a complete parseable snapshot, and recovery
//! reads them in that order.

use crate::container::StorageContainer;
use crate::types::{Index, StorageError};
use tracing::{debug, warn};

pub const INDEX_NAME: &str = "index.json";
pub const BACKUP_NAME: &str = "index.json.bak";
pub const TEMP_NAME: &str = "index.json.tmp";

/// Names reserved for the snapshot protocol; reconciliation skips these.
pub fn is_snapshot_name(name: &str) -> bool {
    matches!(name, INDEX_NAME | BACKUP_NAME | TEMP_NAME)
}

pub async fn write_snapshot<C: StorageContainer + ?Sized>(
    container: &C,
    index: &Index,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(index)
        .map_err(|e| StorageError::Io(format!("serialize index: {}", e)))?;

    // Step 1: full snapshot under the temp name.
    container.write_file(TEMP_NAME, &bytes, true).await?;

    // Step 2: preserve the committed snapshot before removing it. The copy
    // must land before the delete or an interruption loses the fallback.
    match container.read_file(INDEX_NAME).await {
        Ok(committed) => {
            container.write_file(BACKUP_NAME, &committed, true).await?;
            container.delete_file(INDEX_NAME).await?;
        }
        Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    // Step 3: promote the temp contents to the committed name.
    let staged = container.read_file(TEMP_NAME).await?;
    container.write_file(INDEX_NAME, &staged, true).await?;
    container.delete_file(TEMP_NAME).await?;

    debug!(bytes = bytes.len(), "index snapshot committed");
    Ok(())
}

/// Load the most recent complete snapshot, trying committed, then backup,
/// then temp. Returns `None` when no parseable snapshot exists at all.
pub async fn read_snapshot<C: StorageContainer + ?Sized>(
    container: &C,
) -> Result<Option<Index>, StorageError> {
    for name in [INDEX_NAME, BACKUP_NAME, TEMP_NAME] {
        match container.read_file(name).await {
            Ok(bytes) => match serde_json::from_slice::<Index>(&bytes) {
                Ok(index) => {
                    if name != INDEX_NAME {
                        warn!(source = name, "recovered index from fallback snapshot");
                    }
                    return Ok(Some(index));
                }
                Err(e) => {
                    warn!(source = name, error = %e, "snapshot did not parse, trying next");
                }
            },
            Err(StorageError::NotFound(_)) => {}
            Err(StorageError::CapabilityUnavailable) => {
                return Err(StorageError::CapabilityUnavailable)
            }
            Err(e) => warn!(source = name, error = %e, "snapshot unreadable, trying next"),
        }
    }
    Ok(None)
}
