//! Persisted local snapshot — one keyed record shared by same-device relays.
//!
//! DESIGN
//! ======
//! The record is `{participants: {id: Participant}, messages, strokes}`
//! serialized as JSON. Relays overwrite it after every mutation and read it
//! once at startup to seed a newly opened context. No locking beyond the
//! store's own: the last writer wins and every writer holds a converged
//! view most of the time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::listeners::lock;
use crate::model::{ChatMessage, Participant, Stroke};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    #[serde(default)]
    pub participants: BTreeMap<String, Participant>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot codec failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("snapshot store unavailable")]
    Unavailable,
}

/// Storage for the single persisted record.
pub trait SnapshotStore: Send + Sync {
    /// Read the record. `Ok(None)` if nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    fn load(&self) -> Result<Option<PersistedSnapshot>, SnapshotError>;

    /// Overwrite the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), SnapshotError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Process-local store. Clones share the record; holds it serialized.
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    record: Arc<Mutex<Option<String>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every load and save fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }

    /// Replace the raw record.
    pub fn put_raw(&self, raw: impl Into<String>) {
        *lock(&self.record) = Some(raw.into());
    }

    fn check(&self) -> Result<(), SnapshotError> {
        if *lock(&self.unavailable) {
            return Err(SnapshotError::Unavailable);
        }
        Ok(())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<PersistedSnapshot>, SnapshotError> {
        self.check()?;
        let raw = lock(&self.record).clone();
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), SnapshotError> {
        self.check()?;
        let raw = serde_json::to_string(snapshot)?;
        *lock(&self.record) = Some(raw);
        Ok(())
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// Store backed by one JSON file. Writes go to a sibling temp file and are
/// renamed into place.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<PersistedSnapshot>, SnapshotError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
