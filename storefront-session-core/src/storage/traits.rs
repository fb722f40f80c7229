//! Platform interface for durable key-value storage.

use async_trait::async_trait;

use super::error::StorageResult;

/// Persistent, process-wide string key/value store that survives app restarts.
///
/// On device this is backed by the platform secure storage (Keychain,
/// `EncryptedSharedPreferences`). Writes are last-writer-wins; the store is not
/// transactional.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Removes every key in `keys`.
    ///
    /// Stops at the first failure; keys before it stay removed.
    ///
    /// # Errors
    ///
    /// Returns the first delete failure.
    async fn remove_many(&self, keys: &[&str]) -> StorageResult<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}
