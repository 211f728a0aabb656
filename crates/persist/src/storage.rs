//! Durable key-value storage backends.
//!
//! File layout of [`FileStorage`]:
//! ```text
//! <root>/
//!   <key>.json      - one serialized blob per key
//!   <key>.json.tmp  - transient, renamed over <key>.json on write
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors from durable storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
}

/// A string-valued key-value store that outlives the process.
pub trait DurableStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage. Clones share the same map, which lets tests "restart"
/// a store against the content an earlier instance wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl DurableStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().remove(key);
        Ok(())
    }
}

/// File-backed storage: one JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open or create storage rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl DurableStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_clones_share_items() {
        let a = MemoryStorage::new();
        let b = a.clone();
        a.set_item("k", "v").unwrap();
        assert_eq!(b.get_item("k").unwrap().as_deref(), Some("v"));
        b.remove_item("k").unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn file_storage_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path().join("data")).unwrap();
        assert_eq!(storage.get_item("de-colorizer-store").unwrap(), None);

        storage.set_item("de-colorizer-store", "{\"a\":1}").unwrap();
        assert!(storage.root().join("de-colorizer-store.json").is_file());

        let reopened = FileStorage::open(tmp.path().join("data")).unwrap();
        assert_eq!(
            reopened.get_item("de-colorizer-store").unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        reopened.remove_item("de-colorizer-store").unwrap();
        assert_eq!(reopened.get_item("de-colorizer-store").unwrap(), None);
        reopened.remove_item("de-colorizer-store").unwrap();
    }

    #[test]
    fn file_storage_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path()).unwrap();
        storage.set_item("k", "one").unwrap();
        storage.set_item("k", "two").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("two"));
        assert!(!storage.root().join("k.json.tmp").exists());
    }

    #[test]
    fn file_storage_rejects_path_like_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path()).unwrap();
        assert!(matches!(
            storage.set_item("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.get_item("").is_err());
    }
}
