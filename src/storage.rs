// Jarvis Engine — Durable Storage Boundary
// Key-value get/set by string key; values are opaque serialized text.
// A write may fail with a quota condition, which the transcript store
// handles with its clear-and-retry policy.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

// ── Errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store is out of space. Callers may clear and retry.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("storage error: {0}")]
    Backend(String),
}

// ── Trait ──────────────────────────────────────────────────────────────

/// Durable key-value storage. Persistence in this engine is best-effort:
/// callers own the recovery policy, the store just reports what happened.
pub trait KeyValueStorage: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    /// Remove every entry in this store's scope.
    fn clear(&mut self) -> Result<(), StorageError>;
}

// ── File-backed store ──────────────────────────────────────────────────

/// One file per key inside a dedicated directory (default `~/.jarvis`).
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (or create) the storage directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_to_storage)?;
        Ok(FileStorage { dir })
    }

    /// The default storage directory under the user's home.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_default().join(".jarvis")
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Path-based stores must reject keys with separators. The engine only
    /// uses fixed constant keys; this guards the trait's public surface.
    fn validate_key(key: &str) -> Result<(), StorageError> {
        if is_valid_key(key) {
            Ok(())
        } else {
            Err(StorageError::Backend(format!("invalid storage key: {key:?}")))
        }
    }
}

/// Keys must not be able to escape the storage directory.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['/', '\\']) && key != "." && key != ".."
}

fn io_to_storage(e: std::io::Error) -> StorageError {
    // StorageFull / QuotaExceeded are the filesystem analogues of the
    // browser's QuotaExceededError.
    if matches!(e.kind(), ErrorKind::StorageFull | ErrorKind::QuotaExceeded) {
        StorageError::QuotaExceeded
    } else {
        StorageError::Backend(e.to_string())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Self::validate_key(key)?;
        match fs::read_to_string(self.key_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_to_storage(e)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::validate_key(key)?;
        fs::write(self.key_path(key), value).map_err(io_to_storage)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        Self::validate_key(key)?;
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_to_storage(e)),
        }
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        for entry in fs::read_dir(&self.dir).map_err(io_to_storage)? {
            let entry = entry.map_err(io_to_storage)?;
            if entry.path().is_file() {
                fs::remove_file(entry.path()).map_err(io_to_storage)?;
            }
        }
        Ok(())
    }
}

// ── In-memory store ────────────────────────────────────────────────────

/// In-memory key-value store with an optional byte quota. Clones share the
/// same underlying map, which lets a caller keep a handle for inspection
/// while the engine owns the store. Used for ephemeral sessions and tests.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes once total stored bytes would exceed
    /// `quota_bytes`, mimicking the browser storage quota.
    pub fn with_quota(quota_bytes: usize) -> Self {
        MemoryStorage {
            entries: Arc::new(Mutex::new(HashMap::new())),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Snapshot of the current contents.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        entries.clear();
        Ok(())
    }
}
