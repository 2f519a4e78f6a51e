//! Storage container abstraction.
//!
//! The external store exposes only whole-content reads, writes and deletes
//! plus a non-prompting permission probe; there is no atomic rename. The
//! durable store synthesizes crash safety on top of this shape (see
//! [`crate::writer`]).

use crate::types::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

/// A listed entry and its modification time, when the backend knows one.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Capability-scoped external store: a directory handle, a cloud bucket,
/// anything with named whole-file entries and a revocable grant.
#[async_trait]
pub trait StorageContainer: Send + Sync {
    async fn list_entries(&self) -> Result<Vec<EntryInfo>, StorageError>;

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    async fn write_file(&self, name: &str, bytes: &[u8], create: bool)
        -> Result<(), StorageError>;

    async fn delete_file(&self, name: &str) -> Result<(), StorageError>;

    /// Non-prompting grant probe. Safe to call from any context.
    fn check_permission(&self, mode: AccessMode) -> bool;

    /// Prompting grant request. Only valid inside a user-interaction
    /// context; the capability gate enforces that constraint.
    async fn request_permission(&self, mode: AccessMode) -> bool;
}

/// Local-directory container used by the `retrace` binary. Permission maps
/// to filesystem accessibility of the root; reads and writes stay inside it.
pub struct LocalDirContainer {
    root: PathBuf,
}

impl LocalDirContainer {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| map_io_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        // Entry names are flat; reject anything that would escape the root.
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(StorageError::Io(format!("invalid entry name: {}", name)));
        }
        Ok(self.root.join(name))
    }
}

fn map_io_error(path: &Path, err: std::io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => StorageError::CapabilityUnavailable,
        _ => StorageError::Io(format!("{}: {}", path.display(), err)),
    }
}

#[async_trait]
impl StorageContainer for LocalDirContainer {
    async fn list_entries(&self) -> Result<Vec<EntryInfo>, StorageError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(&root).map_err(|e| map_io_error(&root, e))? {
                let entry = entry.map_err(|e| map_io_error(&root, e))?;
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);
                entries.push(EntryInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    modified,
                });
            }
            Ok(entries)
        })
        .await
        .map_err(|e| StorageError::Io(format!("list task failed: {}", e)))?
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.entry_path(name)?;
        tokio::task::spawn_blocking(move || {
            std::fs::read(&path).map_err(|e| map_io_error(&path, e))
        })
        .await
        .map_err(|e| StorageError::Io(format!("read task failed: {}", e)))?
    }

    async fn write_file(
        &self,
        name: &str,
        bytes: &[u8],
        create: bool,
    ) -> Result<(), StorageError> {
        let path = self.entry_path(name)?;
        if !create && !path.exists() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            std::fs::write(&path, bytes).map_err(|e| map_io_error(&path, e))
        })
        .await
        .map_err(|e| StorageError::Io(format!("write task failed: {}", e)))?
    }

    async fn delete_file(&self, name: &str) -> Result<(), StorageError> {
        let path = self.entry_path(name)?;
        tokio::task::spawn_blocking(move || {
            std::fs::remove_file(&path).map_err(|e| map_io_error(&path, e))
        })
        .await
        .map_err(|e| StorageError::Io(format!("delete task failed: {}", e)))?
    }

    fn check_permission(&self, mode: AccessMode) -> bool {
        match std::fs::metadata(&self.root) {
            Ok(meta) => match mode {
                AccessMode::Read => true,
                AccessMode::ReadWrite => !meta.permissions().readonly(),
            },
            Err(_) => false,
        }
    }

    async fn request_permission(&self, mode: AccessMode) -> bool {
        // Local directories have no interactive grant flow; the prompting
        // path re-probes, which is what recovery after a remount needs.
        let granted = self.check_permission(mode);
        debug!(granted, "local container permission re-probe");
        granted
    }
}
