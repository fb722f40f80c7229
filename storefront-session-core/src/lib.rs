//! Session plumbing shared by the storefront mobile apps: credential refresh,
//! push token registration, engagement notifications and local browsing history.

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
use strum::EnumString;

/// Backend deployment the session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Pre-release backend.
    Staging,
    /// Live backend.
    Production,
}

mod error;
pub use error::*;

mod config;
pub use config::SessionConfig;

mod http_request;
pub use http_request::{sanitize_url, ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
pub use reqwest::Method;

mod clock;
pub use clock::{Clock, ManualClock, Sleep, TokioClock};

mod credential;
pub use credential::{Credential, SessionCoordinator};

mod delivery;
pub use delivery::{
    DeliveryRegistrationService, PermissionStatus, PlatformError, PushPlatform,
    RegistrationOutcome, SkipReason,
};

mod reminders;
pub use reminders::{CartAction, CartActivity, OrderSummary, ReminderScheduler};

mod ledger;
pub use ledger::{BehaviorLedger, BehaviorState, CategoryCounts};

mod session;
pub use session::SessionServices;

/// Log bridge to the host app's logger.
pub mod logger;

/// Durable key-value storage.
pub mod storage;

// private modules
mod task;

#[cfg(test)]
mod test_support;

uniffi::setup_scaffolding!("storefront_session_core");
