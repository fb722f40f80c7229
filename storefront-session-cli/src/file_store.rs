//! JSON file backed [`KeyValueStore`].

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use storefront_session_core::storage::{KeyValueStore, StorageError, StorageResult};
use tokio::sync::Mutex;

/// Stores every key in one JSON object on disk.
///
/// Each write rewrites the whole file through a temporary file and a rename,
/// so a crash leaves either the old or the new contents.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Opens the store at `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the parent directory cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::Unavailable(format!("{}: {err}", parent.display())))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| StorageError::Serialization(format!("{}: {err}", self.path.display()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(StorageError::Read {
                key: key.to_string(),
                error: err.to_string(),
            }),
        }
    }

    async fn write_all(&self, key: &str, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        let write_error = |err: std::io::Error| StorageError::Write {
            key: key.to_string(),
            error: err.to_string(),
        };
        tokio::fs::write(&tmp, json).await.map_err(write_error)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_error)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all(key).await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all(key).await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(key, &entries).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all(key).await?;
        if entries.remove(key).is_some() {
            self.write_all(key, &entries).await?;
        }
        Ok(())
    }
}
