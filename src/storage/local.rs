//! Device-scoped storage for the anonymous record.

use crate::core::{EntitlementError, EntitlementState, Result};
use crate::storage::LocalStore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// In-process slot. Holds the serialized record, like a browser key-value slot would.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    slot: Mutex<Option<String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }

    pub fn raw(&self) -> Result<Option<String>> {
        Ok(self.slot.lock()?.clone())
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self) -> Result<Option<EntitlementState>> {
        let slot = self.slot.lock()?;
        slot.as_deref().map(EntitlementState::from_json).transpose()
    }

    fn set(&self, record: &EntitlementState) -> Result<()> {
        let raw = record.to_json()?;
        *self.slot.lock()? = Some(raw);
        Ok(())
    }
}

/// JSON file slot. Writes go through a temp file and a rename so a crash never
/// leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    path: PathBuf,
}

impl FileLocalStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `<dir>/<slot>.json`
    pub fn in_dir<P: AsRef<Path>>(dir: P, slot: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{}.json", slot)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self) -> Result<Option<EntitlementState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            EntitlementError::Storage(format!(
                "Failed to read '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        EntitlementState::from_json(&raw).map(Some)
    }

    fn set(&self, record: &EntitlementState) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| {
            EntitlementError::Storage(format!(
                "Failed to create directory '{}': {}",
                parent.display(),
                e
            ))
        })?;

        let serialized = serde_json::to_vec_pretty(record)?;
        let mut temp = NamedTempFile::new_in(&parent)?;
        temp.write_all(&serialized)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| {
            EntitlementError::Storage(format!(
                "Failed to replace '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }
}
