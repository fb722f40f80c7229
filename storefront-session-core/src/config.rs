//! Backend endpoints and tunables.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{error::SessionError, http_request::sanitize_url, logger::redact, Environment};

/// Refresh endpoint, relative to the base URL.
pub(crate) const REFRESH_PATH: &str = "auth/refresh";
/// Push token registration endpoint (`POST` registers, `DELETE` unregisters).
pub(crate) const PUSH_TOKEN_PATH: &str = "notifications/push-token";
/// Cart mutation notification endpoint.
pub(crate) const CART_UPDATED_PATH: &str = "notifications/cart-updated";
/// Order placement notification endpoint.
pub(crate) const ORDER_PLACED_PATH: &str = "notifications/order-placed";
/// Cart abandonment reminder request endpoint.
pub(crate) const CART_REMINDER_PATH: &str = "notifications/cart-reminder";

/// Configuration shared by every session component.
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Absolute `http(s)` base URL of the storefront backend.
    pub base_url: String,
    /// Per-request timeout applied by the HTTP transport.
    pub request_timeout_secs: u64,
    /// Total push registration attempts per sequence.
    pub push_max_attempts: u32,
    /// Fixed delay between push registration attempts.
    pub push_retry_delay_secs: u64,
    /// Window in which repeated cart/lifecycle triggers are not re-sent.
    pub reminder_debounce_secs: u64,
    /// Cart inactivity after which an abandonment reminder may be requested.
    pub cart_abandonment_secs: u64,
    /// Cap of the viewed products history.
    pub max_viewed_products: usize,
    /// Cap of the search history.
    pub max_search_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_environment(Environment::Production)
    }
}

impl SessionConfig {
    /// Returns the defaults for `environment`.
    #[must_use]
    pub fn from_environment(environment: Environment) -> Self {
        let base_url = match environment {
            Environment::Staging => "https://api.staging.storefront.app/",
            Environment::Production => "https://api.storefront.app/",
        }
        .to_string();

        Self {
            base_url,
            request_timeout_secs: 10,
            push_max_attempts: 3,
            push_retry_delay_secs: 5,
            reminder_debounce_secs: 30,
            cart_abandonment_secs: 60 * 60,
            max_viewed_products: 50,
            max_search_history: 20,
        }
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SerializationError`] for malformed JSON and
    /// [`SessionError::InvalidUrl`] for an unusable `base_url`.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides the base URL, validating it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if `base_url` is not an absolute `http(s)` URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, SessionError> {
        self.base_url = base_url.to_string();
        self.validate()?;
        Ok(self)
    }

    /// Checks the invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if `base_url` is not an absolute `http(s)` URL.
    pub fn validate(&self) -> Result<(), SessionError> {
        sanitize_url(&self.base_url)?;
        Ok(())
    }

    /// Resolves `path` against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if the base URL is unusable.
    pub fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        let mut base = sanitize_url(&self.base_url)?;
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|_| SessionError::InvalidUrl {
                url: redact(path),
            })
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay between push registration attempts.
    #[must_use]
    pub const fn push_retry_delay(&self) -> Duration {
        Duration::from_secs(self.push_retry_delay_secs)
    }

    /// Debounce window for reminder triggers.
    #[must_use]
    pub const fn reminder_debounce(&self) -> Duration {
        Duration::from_secs(self.reminder_debounce_secs)
    }

    /// Inactivity threshold for abandonment reminders.
    #[must_use]
    pub const fn cart_abandonment(&self) -> Duration {
        Duration::from_secs(self.cart_abandonment_secs)
    }
}
