//! Push token registration with the backend.
//!
//! Registration is at-least-once: a bounded fixed-delay retry within the
//! current process, plus a resend on the next app foreground while the
//! durable "sent" flag is unset. The backend treats registration as an upsert
//! keyed by user and device, so duplicate sends are harmless; the flag only
//! avoids redundant calls.
//!
//! All send paths go through one sequence lock. A second sequence requested
//! while one is running reports [`RegistrationOutcome::InProgress`] instead of
//! sending in parallel.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use backon::{ConstantBuilder, Retryable};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    clock::Clock,
    config::PUSH_TOKEN_PATH,
    credential::SessionCoordinator,
    error::SessionError,
    http_request::ApiRequest,
    logger::redact,
    storage::{get_or_log, keys, KeyValueStore},
};

mod platform;

pub use platform::{PermissionStatus, PlatformError, PushPlatform};

/// Why a registration did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SkipReason {
    /// No credential is stored.
    NotLoggedIn,
    /// The device cannot receive push notifications.
    NotDeliveryCapable,
    /// The user did not grant notification permission.
    PermissionDenied,
    /// The platform failed to report permission or issue a token.
    PlatformUnavailable,
    /// No token is stored, so there is nothing to resend.
    NothingToResend,
}

/// Terminal result of a registration request. Failures are reported here and
/// logged, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum RegistrationOutcome {
    /// The backend acknowledged the token.
    Registered {
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// The same token was already acknowledged; nothing was sent.
    AlreadyRegistered,
    /// Every attempt failed; the next foreground resend will try again.
    Exhausted {
        /// Attempts used.
        attempts: u32,
    },
    /// Stopped early because retrying cannot help (session gone, bad URL).
    Abandoned {
        /// Attempts used.
        attempts: u32,
    },
    /// Another registration sequence is running.
    InProgress,
    /// Preconditions not met; nothing was sent.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushTokenBody<'a> {
    expo_push_token: &'a str,
}

#[derive(Debug)]
enum SendError {
    Rejected { status: u16 },
    Failed(SessionError),
}

impl SendError {
    const fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { .. } => true,
            Self::Failed(err) => matches!(
                err,
                SessionError::NetworkFailure { .. } | SessionError::StorageFailure { .. }
            ),
        }
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected { status } => write!(f, "backend answered {status}"),
            Self::Failed(err) => write!(f, "{err}"),
        }
    }
}

impl From<SessionError> for SendError {
    fn from(err: SessionError) -> Self {
        Self::Failed(err)
    }
}

/// Registers this device's push token with the backend.
pub struct DeliveryRegistrationService {
    coordinator: Arc<SessionCoordinator>,
    store: Arc<dyn KeyValueStore>,
    platform: Arc<dyn PushPlatform>,
    clock: Arc<dyn Clock>,
    sequence: Mutex<()>,
    attempts: AtomicU32,
    /// Bumped on removal so a sequence that outlives logout does not mark the
    /// next session's record as sent.
    epoch: AtomicU64,
}

impl DeliveryRegistrationService {
    /// Creates the service. Authenticated calls go through `coordinator`.
    #[must_use]
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        store: Arc<dyn KeyValueStore>,
        platform: Arc<dyn PushPlatform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            coordinator,
            store,
            platform,
            clock,
            sequence: Mutex::new(()),
            attempts: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    /// Attempts made by the current or last unfinished sequence; zero after success.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Obtains the platform token and registers it, retrying on failure.
    ///
    /// A no-op when logged out, on devices without push support, or when the
    /// user declines permission. A token already acknowledged is not resent;
    /// a different token replaces the old record and is sent.
    pub async fn register_delivery_address(&self) -> RegistrationOutcome {
        if !self.coordinator.has_session().await {
            return skipped(SkipReason::NotLoggedIn);
        }
        if !self.platform.is_delivery_capable() {
            log::debug!("device cannot receive push notifications");
            return skipped(SkipReason::NotDeliveryCapable);
        }

        match self.ensure_permission().await {
            Ok(PermissionStatus::Granted) => {}
            Ok(_) => {
                log::info!("push permission not granted");
                return skipped(SkipReason::PermissionDenied);
            }
            Err(err) => {
                log::warn!("push permission unavailable: {}", redact(&err.to_string()));
                return skipped(SkipReason::PlatformUnavailable);
            }
        }

        let token = match self.platform.delivery_token().await {
            Ok(token) if !token.trim().is_empty() => token,
            Ok(_) => {
                log::warn!("platform returned an empty push token");
                return skipped(SkipReason::PlatformUnavailable);
            }
            Err(err) => {
                log::warn!("push token unavailable: {}", redact(&err.to_string()));
                return skipped(SkipReason::PlatformUnavailable);
            }
        };

        self.register_token(&token).await
    }

    /// The platform replaced the push token; the old registration is invalid.
    pub async fn handle_token_rotation(&self, new_token: &str) -> RegistrationOutcome {
        if new_token.trim().is_empty() {
            return skipped(SkipReason::PlatformUnavailable);
        }
        if !self.coordinator.has_session().await {
            // Remember it for the next login's registration.
            if let Err(err) = self.store.set(keys::PUSH_TOKEN, new_token).await {
                log::warn!("push token not persisted: {}", redact(&err.to_string()));
            }
            return skipped(SkipReason::NotLoggedIn);
        }
        self.register_token(new_token).await
    }

    /// Resends the stored token if the backend never acknowledged it.
    ///
    /// Called at app foreground; this is what makes registration eventually
    /// consistent across sessions without retrying in the background forever.
    pub async fn check_and_resend_if_unsent(&self) -> RegistrationOutcome {
        if !self.coordinator.has_session().await {
            return skipped(SkipReason::NotLoggedIn);
        }
        let Ok(_sequence) = self.sequence.try_lock() else {
            return RegistrationOutcome::InProgress;
        };

        let Some(token) = get_or_log(self.store.as_ref(), keys::PUSH_TOKEN).await else {
            return skipped(SkipReason::NothingToResend);
        };
        if self.is_marked_sent().await {
            return RegistrationOutcome::AlreadyRegistered;
        }

        log::info!("resending unacknowledged push token");
        self.send_sequence(&token).await
    }

    /// Sends `token` with the bounded fixed-delay retry, without touching the stored record first.
    pub async fn send_with_retry(&self, token: &str) -> RegistrationOutcome {
        let Ok(_sequence) = self.sequence.try_lock() else {
            return RegistrationOutcome::InProgress;
        };
        self.send_sequence(token).await
    }

    /// Unregisters the token (logout).
    ///
    /// The backend call is best effort. The local record is cleared whatever
    /// happens so the next login starts a clean sequence.
    pub async fn remove_delivery_address(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);

        if let Some(token) = get_or_log(self.store.as_ref(), keys::PUSH_TOKEN).await {
            match self.unregister(&token).await {
                Ok(()) => log::info!("push token unregistered"),
                Err(err) => log::warn!("push token unregister failed: {err}"),
            }
        }

        if let Err(err) = self
            .store
            .remove_many(&[keys::PUSH_TOKEN, keys::PUSH_TOKEN_SENT])
            .await
        {
            log::warn!("push token record not cleared: {}", redact(&err.to_string()));
        }
    }

    async fn ensure_permission(&self) -> Result<PermissionStatus, PlatformError> {
        match self.platform.permission_status().await? {
            PermissionStatus::Undetermined => self.platform.request_permission().await,
            status => Ok(status),
        }
    }

    async fn register_token(&self, token: &str) -> RegistrationOutcome {
        let Ok(_sequence) = self.sequence.try_lock() else {
            return RegistrationOutcome::InProgress;
        };

        let stored = get_or_log(self.store.as_ref(), keys::PUSH_TOKEN).await;
        if stored.as_deref() == Some(token) && self.is_marked_sent().await {
            log::debug!("push token already registered");
            return RegistrationOutcome::AlreadyRegistered;
        }

        if stored.is_some_and(|previous| previous != token) {
            log::info!("push token rotated");
        }
        if let Err(err) = self.store.remove(keys::PUSH_TOKEN_SENT).await {
            log::warn!("push sent flag not cleared: {}", redact(&err.to_string()));
        }
        if let Err(err) = self.store.set(keys::PUSH_TOKEN, token).await {
            log::warn!("push token not persisted: {}", redact(&err.to_string()));
        }

        self.send_sequence(token).await
    }

    /// One bounded attempt sequence. Callers hold the sequence lock.
    async fn send_sequence(&self, token: &str) -> RegistrationOutcome {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);

        let config = self.coordinator.config();
        let max_attempts = config.push_max_attempts.max(1);
        let backoff = ConstantBuilder::default()
            .with_delay(config.push_retry_delay())
            .with_max_times(usize::try_from(max_attempts - 1).unwrap_or(usize::MAX));
        let clock = Arc::clone(&self.clock);

        let result = (move || async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.send_once(token).await
        })
        .retry(backoff)
        .sleep(move |delay| clock.sleep(delay))
        .when(SendError::is_retryable)
        .notify(|err: &SendError, delay| {
            log::info!(
                retry_in_secs = delay.as_secs();
                "push token registration failed, retrying: {}",
                redact(&err.to_string())
            );
        })
        .await;

        let attempts = self.attempts();
        match result {
            Ok(()) => {
                if self.epoch.load(Ordering::SeqCst) == epoch {
                    if let Err(err) = self.store.set(keys::PUSH_TOKEN_SENT, keys::FLAG_SET).await {
                        log::warn!("push sent flag not persisted: {}", redact(&err.to_string()));
                    }
                }
                self.attempts.store(0, Ordering::SeqCst);
                log::info!(attempts = attempts; "push token registered");
                RegistrationOutcome::Registered { attempts }
            }
            Err(err) if err.is_retryable() => {
                log::warn!(
                    attempts = attempts;
                    "push token registration gave up: {}",
                    redact(&err.to_string())
                );
                RegistrationOutcome::Exhausted { attempts }
            }
            Err(err) => {
                log::warn!(
                    attempts = attempts;
                    "push token registration abandoned: {}",
                    redact(&err.to_string())
                );
                RegistrationOutcome::Abandoned { attempts }
            }
        }
    }

    async fn send_once(&self, token: &str) -> Result<(), SendError> {
        let url = self.coordinator.config().endpoint(PUSH_TOKEN_PATH)?;
        let request = ApiRequest::post(url.as_str()).json(&PushTokenBody {
            expo_push_token: token,
        })?;
        let response = self.coordinator.authenticated_request(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(SendError::Rejected {
                status: response.status,
            })
        }
    }

    async fn unregister(&self, token: &str) -> Result<(), SendError> {
        let url = self.coordinator.config().endpoint(PUSH_TOKEN_PATH)?;
        let request = ApiRequest::delete(url.as_str()).json(&PushTokenBody {
            expo_push_token: token,
        })?;
        let response = self.coordinator.authenticated_request(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(SendError::Rejected {
                status: response.status,
            })
        }
    }

    async fn is_marked_sent(&self) -> bool {
        get_or_log(self.store.as_ref(), keys::PUSH_TOKEN_SENT)
            .await
            .is_some_and(|flag| flag == keys::FLAG_SET)
    }
}

const fn skipped(reason: SkipReason) -> RegistrationOutcome {
    RegistrationOutcome::Skipped { reason }
}
