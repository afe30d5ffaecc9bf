//! Backend Token Bridge and Manager
//!
//! The resource server issues its own opaque access/refresh pair. This module
//! talks to it ([`BackendTokenBridge`], [`HttpBackendBridge`]) and tracks the
//! pair's expiry and proactive renewal ([`BackendTokenManager`]).
//!
//! Backend tokens are never inspected locally; their expiry is known only
//! from `expires_in` at issuance.

pub mod manager;

pub use manager::{BackendTokenManager, ScheduledRefresh};

use std::fmt;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::{AuthError, AuthResult};
use crate::identity::OAuthErrorBody;
use crate::transport::{DEFAULT_TIMEOUT, http_client};
use crate::types::BackendPair;

/// Exchanges identity and refresh material with the resource server
///
/// Failures are surfaced as-is; implementations do not retry.
#[async_trait]
pub trait BackendTokenBridge: Send + Sync + fmt::Debug {
    /// Convert an identity assertion into a backend pair
    async fn convert(&self, identity_assertion: &str) -> AuthResult<BackendPair>;

    /// Redeem a backend refresh token for a new backend pair
    async fn refresh(&self, backend_refresh_token: &str) -> AuthResult<BackendPair>;
}

#[derive(Serialize)]
struct ConvertGrant<'a> {
    backend: &'a str,
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    backend: &'a str,
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct GrantResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

/// [`BackendTokenBridge`] speaking the resource server's convert-token protocol
#[derive(Clone)]
pub struct HttpBackendBridge {
    http: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackendBridge {
    /// Bridge with redirects disabled and the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> AuthResult<Self> {
        Ok(Self {
            http: http_client(DEFAULT_TIMEOUT)?,
            config,
        })
    }

    async fn post_grant<T: Serialize + Sync>(&self, url: &str, grant: &T) -> AuthResult<BackendPair> {
        let response = self.http.post(url).json(grant).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let err = OAuthErrorBody::parse(&body);
            warn!(status = status.as_u16(), error = ?err.error, url = %url, "Backend token exchange rejected");
            return Err(AuthError::BackendExchangeFailed {
                status: status.as_u16(),
                error: err.error.unwrap_or_else(|| "backend_error".to_string()),
                message: err
                    .error_description
                    .unwrap_or_else(|| format!("resource server returned {status}")),
            });
        }

        let grant: GrantResponse = serde_json::from_slice(&body)?;
        debug!(expires_in = grant.expires_in, "Backend token exchange succeeded");
        Ok(BackendPair {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_in_seconds: grant.expires_in,
        })
    }
}

impl fmt::Debug for HttpBackendBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackendBridge")
            .field("convert_url", &self.config.convert_url)
            .field("token_url", &self.config.token_url)
            .field("client_id", &self.config.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BackendTokenBridge for HttpBackendBridge {
    async fn convert(&self, identity_assertion: &str) -> AuthResult<BackendPair> {
        let grant = ConvertGrant {
            backend: &self.config.backend,
            grant_type: "convert_token",
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.expose_secret(),
            token: identity_assertion,
        };
        self.post_grant(&self.config.convert_url, &grant).await
    }

    async fn refresh(&self, backend_refresh_token: &str) -> AuthResult<BackendPair> {
        let grant = RefreshGrant {
            backend: &self.config.backend,
            grant_type: "refresh_token",
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.expose_secret(),
            refresh_token: backend_refresh_token,
        };
        self.post_grant(&self.config.token_url, &grant).await
    }
}
