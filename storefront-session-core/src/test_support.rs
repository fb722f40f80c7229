//! Scripted collaborators shared by the unit tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;

use crate::{
    clock::ManualClock,
    config::SessionConfig,
    credential::SessionCoordinator,
    delivery::{PermissionStatus, PlatformError, PushPlatform},
    error::SessionError,
    http_request::{ApiRequest, ApiResponse, HttpTransport},
    logger::{set_logger, LogLevel, Logger},
    storage::{keys, MemoryStore},
};

pub const BASE_URL: &str = "https://api.test.storefront.app/";

/// Backend double.
///
/// Bearer tokens in `valid_tokens` are accepted, all others get a 401. The
/// refresh endpoint and any other path answer from per-path scripts, falling
/// back to 401 for refresh and `200 {}` elsewhere.
#[derive(Default)]
pub struct ScriptedTransport {
    valid_tokens: Mutex<HashSet<String>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<ApiResponse, SessionError>>>>,
    calls: Mutex<Vec<ApiRequest>>,
    /// Cooperative yields before the refresh endpoint answers, so concurrent
    /// callers get polled while a refresh is in flight.
    pub refresh_yields: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            refresh_yields: 16,
            ..Self::default()
        }
    }

    pub fn accept_token(&self, token: &str) {
        self.valid_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn script(&self, path: &str, response: Result<ApiResponse, SessionError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn script_refresh(&self, access_token: &str) {
        self.script(
            "/auth/refresh",
            Ok(ApiResponse::new(
                200,
                format!(r#"{{"accessToken":"{access_token}"}}"#),
            )),
        );
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|request| path_of(&request.url) == path)
            .collect()
    }

    fn next_scripted(&self, path: &str) -> Option<Result<ApiResponse, SessionError>> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front)
    }
}

pub fn path_of(url: &str) -> String {
    reqwest::Url::parse(url).unwrap().path().to_string()
}

pub fn bearer_of(request: &ApiRequest) -> Option<String> {
    request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, value)| value.strip_prefix("Bearer "))
        .map(ToString::to_string)
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        self.calls.lock().unwrap().push(request.clone());
        let path = path_of(&request.url);

        if path == "/auth/refresh" {
            for _ in 0..self.refresh_yields {
                tokio::task::yield_now().await;
            }
            return self
                .next_scripted(&path)
                .unwrap_or_else(|| Ok(ApiResponse::new(401, "{}")));
        }

        let authorized = bearer_of(&request)
            .is_some_and(|token| self.valid_tokens.lock().unwrap().contains(&token));
        if !authorized {
            return Ok(ApiResponse::new(401, r#"{"error":"unauthorized"}"#));
        }

        self.next_scripted(&path)
            .unwrap_or_else(|| Ok(ApiResponse::new(200, "{}")))
    }
}

pub fn network_failure(path: &str) -> Result<ApiResponse, SessionError> {
    Err(SessionError::NetworkFailure {
        url: path.to_string(),
        status: None,
        error: "connection reset".to_string(),
    })
}

/// Host logger double that keeps every record it receives.
#[derive(Default)]
pub struct CapturedLogs {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl CapturedLogs {
    /// Records logged so far whose message starts with `prefix`.
    pub fn messages_starting_with(&self, prefix: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| message.starts_with(prefix))
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Logger for CapturedLogs {
    fn log(&self, level: LogLevel, message: String, _context: HashMap<String, String>) {
        self.records.lock().unwrap().push((level, message));
    }
}

/// Installs the capturing logger for this test binary on first use.
pub fn captured_logs() -> Arc<CapturedLogs> {
    static LOGS: OnceLock<Arc<CapturedLogs>> = OnceLock::new();
    LOGS.get_or_init(|| {
        let logs = Arc::new(CapturedLogs::default());
        set_logger(logs.clone());
        logs
    })
    .clone()
}

pub struct Harness {
    pub config: SessionConfig,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub coordinator: Arc<SessionCoordinator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Logged in with an access token the backend no longer accepts.
    pub fn logged_in_expired() -> Self {
        Self::with_store(MemoryStore::with_entries([
            (keys::AUTH_TOKEN, "expired"),
            (keys::REFRESH_TOKEN, "refresh-1"),
        ]))
    }

    /// Logged in with a valid access token.
    pub fn logged_in() -> Self {
        let harness = Self::with_store(MemoryStore::with_entries([
            (keys::AUTH_TOKEN, "valid"),
            (keys::REFRESH_TOKEN, "refresh-1"),
        ]));
        harness.transport.accept_token("valid");
        harness
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let config = SessionConfig::default().with_base_url(BASE_URL).unwrap();
        let store = Arc::new(store);
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let coordinator = Arc::new(SessionCoordinator::new(
            config.clone(),
            store.clone(),
            transport.clone(),
        ));
        Self {
            config,
            store,
            transport,
            clock,
            coordinator,
        }
    }

    pub fn url(&self, path: &str) -> String {
        self.config.endpoint(path).unwrap().to_string()
    }
}

/// Push platform double.
pub struct FakePlatform {
    capable: bool,
    status: PermissionStatus,
    grant_on_request: bool,
    token: Result<String, String>,
}

impl FakePlatform {
    pub fn granted(token: &str) -> Self {
        Self {
            capable: true,
            status: PermissionStatus::Granted,
            grant_on_request: true,
            token: Ok(token.to_string()),
        }
    }

    pub fn simulator() -> Self {
        Self {
            capable: false,
            ..Self::granted("tok")
        }
    }

    pub fn with_permission(status: PermissionStatus, grant_on_request: bool) -> Self {
        Self {
            status,
            grant_on_request,
            ..Self::granted("tok")
        }
    }

    pub fn token_error() -> Self {
        Self {
            token: Err("no project id".to_string()),
            ..Self::granted("tok")
        }
    }
}

#[async_trait]
impl PushPlatform for FakePlatform {
    fn is_delivery_capable(&self) -> bool {
        self.capable
    }

    async fn permission_status(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(self.status)
    }

    async fn request_permission(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(if self.grant_on_request {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        })
    }

    async fn delivery_token(&self) -> Result<String, PlatformError> {
        self.token.clone().map_err(PlatformError::TokenUnavailable)
    }
}
