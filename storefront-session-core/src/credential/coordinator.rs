use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{
    single_flight::{SingleFlight, Ticket},
    Credential,
};
use crate::{
    config::{SessionConfig, REFRESH_PATH},
    error::SessionError,
    http_request::{sanitize_url, ApiRequest, ApiResponse, HttpTransport},
    logger::redact,
    storage::{get_or_log, keys, KeyValueStore},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Owns the stored credential and performs authenticated calls.
///
/// Construct one per process and share it by `Arc`. Concurrent callers that
/// find the access token missing or rejected share a single refresh call.
pub struct SessionCoordinator {
    config: SessionConfig,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn HttpTransport>,
    refresh: SingleFlight<Option<String>>,
}

impl SessionCoordinator {
    /// Creates a coordinator over the given store and transport.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            refresh: SingleFlight::new(),
        }
    }

    /// The configuration this coordinator was built with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Persists a freshly issued credential (login).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StorageFailure`] if either token cannot be written.
    pub async fn establish_session(&self, credential: &Credential) -> Result<(), SessionError> {
        self.store
            .set(keys::AUTH_TOKEN, credential.access_token.expose_secret())
            .await?;
        self.store
            .set(keys::REFRESH_TOKEN, credential.refresh_token.expose_secret())
            .await?;
        log::info!("session established");
        Ok(())
    }

    /// Removes both tokens (logout).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StorageFailure`] if the tokens cannot be removed.
    pub async fn clear_session(&self) -> Result<(), SessionError> {
        self.store
            .remove_many(&[keys::AUTH_TOKEN, keys::REFRESH_TOKEN])
            .await?;
        log::info!("session cleared");
        Ok(())
    }

    /// Whether any credential is stored. Store failures read as "no session".
    pub async fn has_session(&self) -> bool {
        get_or_log(self.store.as_ref(), keys::AUTH_TOKEN).await.is_some()
            || get_or_log(self.store.as_ref(), keys::REFRESH_TOKEN)
                .await
                .is_some()
    }

    /// The stored access token, which may already be expired.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StorageFailure`] if the store cannot be read.
    pub async fn access_token(&self) -> Result<Option<SecretString>, SessionError> {
        Ok(self.stored_access_token().await?.map(SecretString::from))
    }

    /// Returns a usable access token, refreshing if none is stored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoValidCredential`] if there is no token and the
    /// session cannot be refreshed, [`SessionError::StorageFailure`] if the
    /// store cannot be read.
    pub async fn valid_access_token(&self) -> Result<SecretString, SessionError> {
        self.current_or_refreshed_token()
            .await
            .map(SecretString::from)
    }

    /// Whether a refresh call is currently running.
    #[must_use]
    pub fn refresh_in_flight(&self) -> bool {
        self.refresh.is_in_flight()
    }

    /// Exchanges the stored refresh token for a new access token.
    ///
    /// Single-flight: callers arriving while a refresh runs share its result and
    /// no second network call is made. Once it resolves, the next call starts a
    /// new refresh. `None` means the session cannot be recovered; callers must
    /// treat that as "login required" and not retry.
    pub async fn refresh_token(&self) -> Option<SecretString> {
        self.shared_refresh().await.map(SecretString::from)
    }

    /// Performs `request` with the stored bearer token, refreshing and retrying
    /// exactly once if the server rejects the token.
    ///
    /// Responses other than `401` are returned as they are, error statuses included.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidUrl`] if the URL is not absolute `http(s)`; nothing is sent.
    /// - [`SessionError::NoValidCredential`] if no token is stored or obtainable.
    /// - [`SessionError::AuthenticationFailure`] if the refreshed token is rejected too.
    /// - [`SessionError::NetworkFailure`] on transport errors; never retried here.
    /// - [`SessionError::StorageFailure`] if the store cannot be read.
    pub async fn authenticated_request(
        &self,
        mut request: ApiRequest,
    ) -> Result<ApiResponse, SessionError> {
        let url = sanitize_url(&request.url)?;
        let redacted_url = redact(url.as_str());
        request.url = url.into();

        let token = self.current_or_refreshed_token().await?;

        let response = self.transport.execute(request.with_bearer(&token)).await?;
        if !response.is_auth_failure() {
            return Ok(response);
        }

        log::debug!(url = redacted_url.as_str(); "credential rejected, refreshing once");
        let Some(replacement) = self.replacement_token(&token).await else {
            log::info!(url = redacted_url.as_str(); "session not recoverable after rejection");
            return Err(SessionError::NoValidCredential);
        };

        let retried = self
            .transport
            .execute(request.with_bearer(&replacement))
            .await?;
        if retried.is_auth_failure() {
            log::warn!(url = redacted_url.as_str(), status = retried.status; "refreshed credential rejected");
            return Err(SessionError::AuthenticationFailure {
                url: redacted_url,
                status: retried.status,
            });
        }
        Ok(retried)
    }

    async fn stored_access_token(&self) -> Result<Option<String>, SessionError> {
        Ok(self
            .store
            .get(keys::AUTH_TOKEN)
            .await?
            .filter(|token| !token.is_empty()))
    }

    async fn current_or_refreshed_token(&self) -> Result<String, SessionError> {
        if let Some(token) = self.stored_access_token().await? {
            return Ok(token);
        }
        log::debug!("no access token stored, refreshing");
        self.shared_refresh()
            .await
            .ok_or(SessionError::NoValidCredential)
    }

    /// A token to retry with after `rejected` was refused.
    ///
    /// If another caller already stored a different token, that one is used
    /// without another refresh call.
    async fn replacement_token(&self, rejected: &str) -> Option<String> {
        if let Some(current) = get_or_log(self.store.as_ref(), keys::AUTH_TOKEN).await {
            if !current.is_empty() && current != rejected {
                return Some(current);
            }
        }
        self.shared_refresh().await
    }

    async fn shared_refresh(&self) -> Option<String> {
        match self.refresh.join() {
            Ticket::Follower(follower) => follower.wait().await.flatten(),
            Ticket::Leader(leader) => {
                let token = self.perform_refresh().await;
                leader.complete(token.clone());
                token
            }
        }
    }

    async fn perform_refresh(&self) -> Option<String> {
        let Some(refresh_token) = get_or_log(self.store.as_ref(), keys::REFRESH_TOKEN).await
        else {
            log::debug!("no refresh token stored");
            return None;
        };

        let request = match self.refresh_request(&refresh_token) {
            Ok(request) => request,
            Err(err) => {
                log::error!("cannot build refresh request: {}", redact(&err.to_string()));
                return None;
            }
        };

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!("refresh request failed: {}", redact(&err.to_string()));
                return None;
            }
        };
        if !response.is_success() {
            log::warn!(status = response.status; "refresh rejected");
            return None;
        }

        let payload: RefreshResponse = match response.json() {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("malformed refresh response: {}", redact(&err.to_string()));
                return None;
            }
        };
        if payload.access_token.is_empty() {
            log::warn!("refresh response carried an empty access token");
            return None;
        }

        if let Err(err) = self.store.set(keys::AUTH_TOKEN, &payload.access_token).await {
            log::warn!("refreshed access token not persisted: {}", redact(&err.to_string()));
        }
        if let Some(rotated) = payload.refresh_token.filter(|token| !token.is_empty()) {
            if let Err(err) = self.store.set(keys::REFRESH_TOKEN, &rotated).await {
                log::warn!("rotated refresh token not persisted: {}", redact(&err.to_string()));
            }
        }

        log::info!("access token refreshed");
        Some(payload.access_token)
    }

    fn refresh_request(&self, refresh_token: &str) -> Result<ApiRequest, SessionError> {
        let url = self.config.endpoint(REFRESH_PATH)?;
        ApiRequest::post(url.as_str()).json(&RefreshRequest { refresh_token })
    }
}
