use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Keyed store of serialized JSON records.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: String) -> StorageResult<()>;
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.records().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> StorageResult<()> {
        self.records().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.records().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per record under a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: PathBuf) -> StorageResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.record_path(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: String) -> StorageResult<()> {
        let path = self.record_path(key);
        // Write then rename so readers never see a half-written record
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.record_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_get_set_delete() {
        let store = MemoryStorage::new();
        assert!(store.get("a").unwrap().is_none());
        store.set("a", "1".into()).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path().to_path_buf()).unwrap();
        store.set("report", r#"{"x":1}"#.into()).unwrap();

        let reopened = FileStorage::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.get("report").unwrap().as_deref(), Some(r#"{"x":1}"#));
        assert!(!dir.path().join("report.json.tmp").exists());
    }

    #[test]
    fn test_file_storage_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path().join("nested")).unwrap();
        assert!(store.delete("never-written").is_ok());
        assert!(store.get("never-written").unwrap().is_none());
    }
}
