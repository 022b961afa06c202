//! Pluggable persistence for the designated state branches.
//!
//! Backends store one opaque JSON snapshot per key. Corrupt or missing data
//! is treated as "no prior state", never as an error the store has to act
//! on; the store logs backend failures and degrades to in-memory operation.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use serde_json::Value;

use crate::errors::{RuntimeError, RuntimeResult};

/// External key-value slot the store serializes its persisted branches into.
pub trait PersistenceBackend: Send + Sync {
    /// Read the snapshot stored under `key`, if any. Unreadable or corrupt
    /// data should surface as `Ok(None)`.
    fn load(&self, key: &str) -> RuntimeResult<Option<Value>>;

    /// Write `snapshot` under `key`, replacing any prior value.
    fn save(&self, key: &str, snapshot: &Value) -> RuntimeResult<()>;

    /// Remove whatever is stored under `key`.
    fn clear(&self, key: &str) -> RuntimeResult<()>;
}

/// File-per-key JSON backend rooted at a directory.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl PersistenceBackend for FileBackend {
    fn load(&self, key: &str) -> RuntimeResult<Option<Value>> {
        let path = self.slot_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                tracing::warn!(key, %error, "ignoring corrupt persisted snapshot");
                Ok(None)
            }
        }
    }

    fn save(&self, key: &str, snapshot: &Value) -> RuntimeResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| RuntimeError::Persistence {
            reason: e.to_string(),
        })?;
        let raw = serde_json::to_string(snapshot)?;
        fs::write(self.slot_path(key), raw).map_err(|e| RuntimeError::Persistence {
            reason: e.to_string(),
        })
    }

    fn clear(&self, key: &str) -> RuntimeResult<()> {
        match fs::remove_file(self.slot_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::Persistence {
                reason: e.to_string(),
            }),
        }
    }
}

/// In-memory backend, used in tests and as a default stand-in.
#[derive(Default)]
pub struct MemoryBackend {
    slots: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a slot, e.g. to simulate a prior run in tests.
    pub fn seed(&self, key: &str, snapshot: Value) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.insert(key.to_string(), snapshot);
    }
}

impl PersistenceBackend for MemoryBackend {
    fn load(&self, key: &str) -> RuntimeResult<Option<Value>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        Ok(slots.get(key).cloned())
    }

    fn save(&self, key: &str, snapshot: &Value) -> RuntimeResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    fn clear(&self, key: &str) -> RuntimeResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.remove(key);
        Ok(())
    }
}
