//! Platform interface for push delivery.

use async_trait::async_trait;
use thiserror::Error;

/// Notification permission as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PermissionStatus {
    /// The user allowed notifications.
    Granted,
    /// The user refused notifications.
    Denied,
    /// The user has not been asked yet.
    Undetermined,
}

/// Failure reported by the platform push layer.
#[derive(Debug, Error, uniffi::Error)]
pub enum PlatformError {
    /// The push service could not issue a token (no network, no project id, ...).
    #[error("token unavailable: {0}")]
    TokenUnavailable(String),
    /// The permission state could not be read or requested.
    #[error("permission query failed: {0}")]
    Permission(String),
}

/// Push capabilities of the device, implemented by the host app.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Whether this device can receive push notifications at all (simulators cannot).
    fn is_delivery_capable(&self) -> bool;

    /// Current notification permission.
    ///
    /// # Errors
    ///
    /// Returns an error if the permission state cannot be read.
    async fn permission_status(&self) -> Result<PermissionStatus, PlatformError>;

    /// Prompts the user for notification permission and returns the answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt cannot be shown.
    async fn request_permission(&self) -> Result<PermissionStatus, PlatformError>;

    /// Fetches the push token the backend uses to address this device.
    ///
    /// # Errors
    ///
    /// Returns an error if the push service does not issue a token.
    async fn delivery_token(&self) -> Result<String, PlatformError>;
}
