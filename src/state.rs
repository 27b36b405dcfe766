//! Lockable key/value state document shared by the identity layer.
//!
//! A [`State`] holds one JSON document keyed by fixed entry names. All
//! access goes through a [`StateGuard`] obtained from [`State::lock`], so a
//! read-then-write sequence always sees a consistent view and the lock is
//! released on every exit path, error paths included.
//!
//! ## Persistence
//! - `State::new()` keeps the document in memory only
//! - `State::open(path)` loads the document from disk (or starts empty) and
//!   checkpoints it back whenever a modifying guard is released
//! - Checkpoints are atomic: the document is written to a temp file in the
//!   same directory and renamed over the target

use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Errors raised by the state container.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The requested entry does not exist.
    #[error("no state entry for key {0:?}")]
    NoState(String),
    #[error("cannot access state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot (de)serialize state: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct Document {
    entries: Map<String, Value>,
    modified: bool,
}

/// Process-wide state document protected by an exclusive lock.
#[derive(Debug, Default)]
pub struct State {
    doc: Mutex<Document>,
    backing_file: Option<PathBuf>,
}

impl State {
    /// Create an empty in-memory state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed state. A missing file yields an empty document.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let entries = match std::fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Map::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "State loaded");

        Ok(Self {
            doc: Mutex::new(Document {
                entries,
                modified: false,
            }),
            backing_file: Some(path.to_path_buf()),
        })
    }

    /// Path of the backing file, if any.
    pub fn backing_file(&self) -> Option<&Path> {
        self.backing_file.as_deref()
    }

    /// Acquire the exclusive lock. Released when the guard is dropped.
    pub fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            state: self,
            doc: self.doc.lock(),
        }
    }
}

/// Exclusive access to the state document.
pub struct StateGuard<'a> {
    state: &'a State,
    doc: MutexGuard<'a, Document>,
}

impl StateGuard<'_> {
    /// Deserialize the entry stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        let value = self
            .doc
            .entries
            .get(key)
            .ok_or_else(|| StateError::NoState(key.to_string()))?;
        Ok(T::deserialize(value)?)
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value)?;
        self.doc.entries.insert(key.to_string(), value);
        self.doc.modified = true;
        Ok(())
    }

    /// Remove the entry under `key`. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let existed = self.doc.entries.remove(key).is_some();
        if existed {
            self.doc.modified = true;
        }
        existed
    }

    /// Write pending modifications to the backing file now.
    ///
    /// No-op for in-memory state or when nothing changed since the last
    /// checkpoint.
    pub fn checkpoint(&mut self) -> Result<(), StateError> {
        if !self.doc.modified {
            return Ok(());
        }
        if let Some(path) = self.state.backing_file.as_deref() {
            write_atomically(path, &self.doc.entries)?;
        }
        self.doc.modified = false;
        Ok(())
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.checkpoint() {
            tracing::warn!("Failed to checkpoint state on unlock: {e}");
        }
    }
}

fn write_atomically(path: &Path, entries: &Map<String, Value>) -> Result<(), StateError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, entries)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
    Ok(())
}
