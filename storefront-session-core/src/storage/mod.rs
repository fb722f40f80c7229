//! Durable key-value storage: the platform trait, its errors and the persisted key names.

pub mod error;
pub mod keys;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use traits::KeyValueStore;

use crate::logger::redact;

/// Reads `key`, logging and swallowing store failures.
///
/// Used on paths where a broken store must degrade to "nothing stored" rather
/// than fail the caller.
pub(crate) async fn get_or_log(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value,
        Err(err) => {
            log::warn!(key = key; "store read failed: {}", redact(&err.to_string()));
            None
        }
    }
}
