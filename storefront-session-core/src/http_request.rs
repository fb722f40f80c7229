use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::{de::DeserializeOwned, Serialize};

use crate::{error::SessionError, logger::redact};

/// One HTTP exchange as seen by the session components.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL. Must be an absolute `http(s)` URL by the time it is sent.
    pub url: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Creates a request without headers or body.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a `POST` request.
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Creates a `DELETE` request.
    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SerializationError`] if `body` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, SessionError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Returns a copy carrying `token` as the bearer credential, replacing any previous one.
    #[must_use]
    pub(crate) fn with_bearer(&self, token: &str) -> Self {
        let mut request = self.clone();
        request
            .headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
        request
            .headers
            .push(("Authorization".to_string(), format!("Bearer {token}")));
        request
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the server rejected the credential.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        self.status == 401
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SerializationError`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_slice(&self.body).map_err(|e| SessionError::SerializationError {
            error: format!("failed to parse response body: {e}"),
        })
    }

    /// Body as lossy UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes HTTP exchanges.
///
/// Implementations perform exactly one attempt per call. Retrying is the
/// caller's decision.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns whatever status the server answered with.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NetworkFailure`] when no response was received and
    /// [`SessionError::InvalidUrl`] when the URL cannot be used.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError>;
}

/// Parses `raw` and accepts it only if it is an absolute `http`/`https` URL with a host.
///
/// # Errors
///
/// Returns [`SessionError::InvalidUrl`] otherwise.
pub fn sanitize_url(raw: &str) -> Result<Url, SessionError> {
    let invalid = || SessionError::InvalidUrl { url: redact(raw) };
    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }
    Ok(url)
}

/// A simple wrapper on an HTTP client for making requests. Sets sensible defaults such as
/// timeouts and user-agent. Never retries.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Initializes a new transport with the given per-request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let url = sanitize_url(&request.url)?;
        let redacted_url = redact(url.as_str());

        let mut builder = self
            .client
            .request(request.method, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("storefront-session-core/{}", env!("CARGO_PKG_VERSION")),
            );
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(|err| {
            let kind = if err.is_timeout() {
                "timeout"
            } else if err.is_connect() {
                "connect"
            } else {
                "request"
            };
            SessionError::NetworkFailure {
                url: redacted_url.clone(),
                status: None,
                error: format!("{kind} error: {}", redact(&err.to_string())),
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| SessionError::NetworkFailure {
                url: redacted_url,
                status: Some(status),
                error: format!("failed to read body: {}", redact(&err.to_string())),
            })?;

        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use test_case::test_case;

    #[test_case("https://api.storefront.app/cart" ; "https")]
    #[test_case("http://localhost:8080/cart" ; "http with port")]
    #[test_case("  https://api.storefront.app/  " ; "surrounding whitespace")]
    fn test_sanitize_url_accepts(raw: &str) {
        assert!(sanitize_url(raw).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("/relative/path" ; "relative")]
    #[test_case("ftp://files.example/a" ; "ftp")]
    #[test_case("javascript:alert(1)" ; "javascript")]
    #[test_case("file:///etc/passwd" ; "file")]
    #[test_case("https://" ; "no host")]
    fn test_sanitize_url_rejects(raw: &str) {
        assert!(matches!(
            sanitize_url(raw),
            Err(SessionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_with_bearer_replaces_existing_header() {
        let request = ApiRequest::get("https://api.storefront.app/me")
            .header("authorization", "Bearer old")
            .header("X-Trace", "1");
        let request = request.with_bearer("new");
        assert_eq!(
            request.headers,
            vec![
                ("X-Trace".to_string(), "1".to_string()),
                ("Authorization".to_string(), "Bearer new".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reqwest_transport_sends_headers_and_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/cart/items")
            .match_header("authorization", "Bearer abc")
            .match_header("user-agent", Matcher::Regex("storefront-session-core/.*".to_string()))
            .match_body(Matcher::Json(serde_json::json!({"sku": "tee-001", "qty": 2})))
            .with_status(201)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5));
        let request = ApiRequest::post(format!("{}/cart/items", server.url()))
            .json(&serde_json::json!({"sku": "tee-001", "qty": 2}))
            .unwrap()
            .with_bearer("abc");

        let response = transport.execute(request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 201);
        assert!(response.is_success());
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_reqwest_transport_returns_error_statuses_unmodified() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/orders")
            .with_status(503)
            .with_body("maintenance")
            .expect(1)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5));
        let response = transport
            .execute(ApiRequest::get(format!("{}/orders", server.url())))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.text(), "maintenance");
    }

    #[tokio::test]
    async fn test_reqwest_transport_connect_failure() {
        let transport = ReqwestTransport::new(Duration::from_secs(1));
        // Port 9 (discard) is closed on test hosts.
        let result = transport
            .execute(ApiRequest::get("http://127.0.0.1:9/unreachable"))
            .await;
        assert!(matches!(
            result,
            Err(SessionError::NetworkFailure { status: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_reqwest_transport_rejects_bad_scheme() {
        let transport = ReqwestTransport::new(Duration::from_secs(1));
        let result = transport
            .execute(ApiRequest::get("ftp://files.example/a"))
            .await;
        assert!(matches!(result, Err(SessionError::InvalidUrl { .. })));
    }
}
