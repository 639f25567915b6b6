//! Key-value store adapter.
//!
//! [`LocalStore`] gives feature code typed access to a string-keyed store of
//! JSON text. It never fails loudly: reads fall back to the caller's default
//! and writes report `false`, with the cause logged.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::StorageError;

type StorageResult<T> = std::result::Result<T, StorageError>;

/// Raw persistence behind [`LocalStore`].
pub trait KeyValueBackend: Send + Sync {
    fn read(&self, key: &str) -> StorageResult<Option<String>>;
    fn write(&self, key: &str, value: String) -> StorageResult<()>;
    fn delete(&self, key: &str) -> StorageResult<()>;
    fn clear(&self) -> StorageResult<()>;
}

/// In-process backend with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push keys plus values past `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            quota: Some(bytes),
        }
    }

    /// Bytes currently used by keys and values.
    pub fn usage(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn write(&self, key: &str, value: String) -> StorageResult<()> {
        if let Some(quota) = self.quota {
            let replaced = self
                .entries
                .get(key)
                .map(|v| key.len() + v.value().len())
                .unwrap_or(0);
            let needed = self.usage().saturating_sub(replaced) + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.entries.clear();
        Ok(())
    }
}

/// One `<key>.json` file per key under a data directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (and create if needed) a data directory.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueBackend for FileBackend {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: String) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear(&self) -> StorageResult<()> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Typed, failure-tolerant access to a [`KeyValueBackend`].
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl LocalStore {
    pub fn new(backend: impl KeyValueBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_shared(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Read and decode `key`, or return `default` when it is absent or unreadable.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.read_json(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                tracing::error!(key, error = %e, "failed to read local key");
                default
            }
        }
    }

    /// Raw JSON value at `key`, if present and decodable.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        match self.read_json(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(key, error = %e, "failed to read local key");
                None
            }
        }
    }

    /// Encode and write `value`; `false` when it could not be persisted.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let result = serde_json::to_string(value)
            .map_err(StorageError::from)
            .and_then(|text| self.backend.write(key, text));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key, error = %e, "failed to write local key");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.backend.delete(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key, error = %e, "failed to remove local key");
                false
            }
        }
    }

    pub fn clear(&self) -> bool {
        match self.backend.clear() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "failed to clear local store");
                false
            }
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.backend.read(key)? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}
