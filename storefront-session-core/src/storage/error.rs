//! Error types for the key-value store.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by [`KeyValueStore`](super::KeyValueStore) implementations.
#[derive(Debug, Error, uniffi::Error)]
pub enum StorageError {
    /// The store could not be read.
    #[error("store read error for {key}: {error}")]
    Read {
        /// Key being read.
        key: String,
        /// Underlying failure.
        error: String,
    },

    /// The store could not be written.
    #[error("store write error for {key}: {error}")]
    Write {
        /// Key being written.
        key: String,
        /// Underlying failure.
        error: String,
    },

    /// The store backend is not available at all (locked keychain, missing directory, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}
