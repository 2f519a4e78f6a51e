//! In-memory container with scriptable grant loss and fault injection.
//!
//! Used by tests to exercise the rolling-write interruption matrix and the
//! capability recovery path without touching a real filesystem.

use crate::container::{AccessMode, EntryInfo, StorageContainer};
use crate::types::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone)]
struct MemFile {
    bytes: Vec<u8>,
    modified: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryContainer {
    files: Mutex<HashMap<String, MemFile>>,
    granted: AtomicBool,
    /// Remaining mutating operations before an injected `Io` failure.
    fail_after: Mutex<Option<u32>>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            granted: AtomicBool::new(true),
            fail_after: Mutex::new(None),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    /// Inject an `Io` failure on the `n + 1`-th mutating operation from now,
    /// simulating a process interruption mid-protocol.
    pub fn fail_after_mutations(&self, n: u32) {
        *self.fail_after.lock() = Some(n);
    }

    pub fn clear_fault(&self) {
        *self.fail_after.lock() = None;
    }

    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Place a file directly, bypassing grant and fault checks.
    pub fn seed_file(&self, name: &str, bytes: &[u8], modified: Option<DateTime<Utc>>) {
        self.files.lock().insert(
            name.to_string(),
            MemFile {
                bytes: bytes.to_vec(),
                modified,
            },
        );
    }

    fn check_grant(&self) -> Result<(), StorageError> {
        if self.granted.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::CapabilityUnavailable)
        }
    }

    fn tick_fault(&self) -> Result<(), StorageError> {
        let mut fail_after = self.fail_after.lock();
        if let Some(remaining) = fail_after.as_mut() {
            if *remaining == 0 {
                return Err(StorageError::Io("injected fault".into()));
            }
            *remaining -= 1;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageContainer for MemoryContainer {
    async fn list_entries(&self) -> Result<Vec<EntryInfo>, StorageError> {
        self.check_grant()?;
        Ok(self
            .files
            .lock()
            .iter()
            .map(|(name, file)| EntryInfo {
                name: name.clone(),
                modified: file.modified,
            })
            .collect())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.check_grant()?;
        self.files
            .lock()
            .get(name)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn write_file(
        &self,
        name: &str,
        bytes: &[u8],
        create: bool,
    ) -> Result<(), StorageError> {
        self.check_grant()?;
        self.tick_fault()?;
        let mut files = self.files.lock();
        if !create && !files.contains_key(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        files.insert(
            name.to_string(),
            MemFile {
                bytes: bytes.to_vec(),
                modified: Some(Utc::now()),
            },
        );
        Ok(())
    }

    async fn delete_file(&self, name: &str) -> Result<(), StorageError> {
        self.check_grant()?;
        self.tick_fault()?;
        self.files
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn check_permission(&self, _mode: AccessMode) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn request_permission(&self, _mode: AccessMode) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}
