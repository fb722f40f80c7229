use thiserror::Error;

use crate::storage::StorageError;

/// Error outputs from the session kit.
#[derive(Debug, Error, uniffi::Error)]
pub enum SessionError {
    /// The target URL is malformed or does not use `http`/`https`. Raised before any I/O.
    #[error("invalid_url: {url}")]
    InvalidUrl {
        /// The rejected URL, redacted.
        url: String,
    },
    /// There is no session that can be recovered through a refresh.
    #[error("no_valid_credential")]
    NoValidCredential,
    /// The server rejected the credential even after one refresh-and-retry cycle.
    #[error("authentication_failure: {url} returned {status}")]
    AuthenticationFailure {
        /// The URL of the rejected request, redacted.
        url: String,
        /// The status code of the final rejection.
        status: u16,
    },
    /// Transport-level failure unrelated to authentication.
    #[error("network_failure: {url} {error}")]
    NetworkFailure {
        /// The URL of the failed request, redacted.
        url: String,
        /// The status code, if the failure carried one.
        status: Option<u16>,
        /// Description of the failure.
        error: String,
    },
    /// The persistent store is unavailable.
    #[error("storage_failure: {error}")]
    StorageFailure {
        /// Description of the store failure.
        error: String,
    },
    /// A payload could not be serialized or deserialized.
    #[error("serialization_error: {error}")]
    SerializationError {
        /// Description of the failure.
        error: String,
    },
}

impl SessionError {
    /// Whether the failure means authenticated actions are impossible until the user logs in again.
    ///
    /// These are the only failures of this crate that should become user-visible.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::NoValidCredential | Self::AuthenticationFailure { .. }
        )
    }
}

impl From<StorageError> for SessionError {
    fn from(error: StorageError) -> Self {
        Self::StorageFailure {
            error: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError {
            error: error.to_string(),
        }
    }
}
