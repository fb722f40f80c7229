//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storefront_session_core::{
    storage::{keys, MemoryStore},
    ManualClock, PermissionStatus, PlatformError, PushPlatform, ReqwestTransport, SessionConfig,
    SessionServices,
};

/// Device that always grants permission and reports a fixed token.
pub struct GrantedPlatform {
    token: String,
}

impl GrantedPlatform {
    /// Platform that hands out `token`.
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl PushPlatform for GrantedPlatform {
    fn is_delivery_capable(&self) -> bool {
        true
    }

    async fn permission_status(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(PermissionStatus::Granted)
    }

    async fn request_permission(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(PermissionStatus::Granted)
    }

    async fn delivery_token(&self) -> Result<String, PlatformError> {
        Ok(self.token.clone())
    }
}

/// Wired services plus handles to their store and clock.
pub struct TestSession {
    /// Services under test.
    pub services: SessionServices,
    /// Store shared with the services.
    pub store: Arc<MemoryStore>,
    /// Clock driving retry delays and debounce windows.
    pub clock: Arc<ManualClock>,
}

/// Services talking to `base_url` over real HTTP, with a manual clock so
/// retry delays do not slow the tests down.
pub fn session(base_url: &str, store: MemoryStore) -> TestSession {
    let config = SessionConfig::default().with_base_url(base_url).unwrap();
    let store = Arc::new(store);
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let services = SessionServices::new(
        config,
        store.clone(),
        Arc::new(ReqwestTransport::new(Duration::from_secs(5))),
        Arc::new(GrantedPlatform::new("ExponentPushToken[device-1]")),
        clock.clone(),
    );
    TestSession {
        services,
        store,
        clock,
    }
}

/// Store holding a credential pair.
pub fn logged_in_store(access_token: &str, refresh_token: &str) -> MemoryStore {
    MemoryStore::with_entries([
        (keys::AUTH_TOKEN, access_token),
        (keys::REFRESH_TOKEN, refresh_token),
    ])
}
