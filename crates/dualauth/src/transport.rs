//! Outbound HTTP for authenticated calls
//!
//! [`HttpTransport`] is the seam the orchestrator sends API calls through.
//! [`ReqwestTransport`] is the production implementation.
//!
//! ## Security Configuration
//!
//! Clients built by [`http_client`] are configured to:
//! - NOT follow redirects, so bearer credentials never leave the intended host
//! - Time out every request

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{AuthError, AuthResult};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a reqwest client with redirects disabled and a request timeout.
///
/// # Errors
///
/// Returns `AuthError::Configuration` if the TLS backend fails to initialize.
pub fn http_client(timeout: Duration) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// An outbound API request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Bytes>,
}

impl ApiRequest {
    /// Request with no headers or body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Serialization` if the body cannot be encoded.
    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> AuthResult<Self> {
        let mut request = Self::new(Method::POST, url);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(serde_json::to_vec(body)?));
        Ok(request)
    }

    /// Add a header.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the name or value is not a valid header.
    pub fn header(mut self, name: &str, value: &str) -> AuthResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AuthError::Configuration(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AuthError::Configuration(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Copy of this request carrying `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Malformed` if the token contains bytes not allowed in a header.
    pub fn with_bearer(&self, token: &str) -> AuthResult<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| AuthError::Malformed("token is not a valid header value".to_string()))?;
        value.set_sensitive(true);

        let mut request = self.clone();
        request.headers.insert(AUTHORIZATION, value);
        Ok(request)
    }
}

/// Response to an [`ApiRequest`]
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Full response body
    pub body: Bytes,
}

impl ApiResponse {
    /// Whether the server rejected the credential
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Serialization` if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends API requests
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Send a request and read the full response.
    ///
    /// Non-2xx statuses are responses, not errors.
    async fn send(&self, request: ApiRequest) -> AuthResult<ApiResponse>;
}

/// [`HttpTransport`] over a reqwest client
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Transport with redirects disabled and the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the client cannot be built.
    pub fn new() -> AuthResult<Self> {
        Ok(Self {
            inner: http_client(DEFAULT_TIMEOUT)?,
        })
    }

    /// Wrap an existing client
    ///
    /// The client should be configured with `redirect::Policy::none()`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let mut builder = self
            .inner
            .request(request.method, request.url.as_str())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
