//! HTTP client for the bridge server
//!
//! [`BridgeClient`] is the device-side view of the bridge: it redeems the
//! authorization code, and it stands in for the session and backend token
//! managers when the orchestrator runs on a client that does not hold the
//! signing secret.
//!
//! Without the secret, access tokens are checked by reading their claims
//! (kind and expiry) and leaving signature checks to the server.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::backend::BackendTokenBridge;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwt::{Claims, TokenCodec, TokenKind};
use crate::session::SessionAuthority;
use crate::transport::http_client;
use crate::types::{BackendPair, SessionPair, UserIdentity};
use crate::wire::{
    BackendRefreshRequest, BackendRefreshResponse, ErrorBody, SessionRefreshRequest,
    SessionRefreshResponse, TokenExchangeResponse,
};

/// Identity exchange endpoint
pub const TOKEN_PATH: &str = "api/auth/token";
/// Session refresh endpoint
pub const REFRESH_PATH: &str = "api/auth/refresh";
/// Backend refresh endpoint
pub const BACKEND_REFRESH_PATH: &str = "api/auth/apirefresh";

/// Client for the bridge server's auth endpoints
#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base: Url,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// Client for the server at `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` for an unparseable base URL or if
    /// the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> AuthResult<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| AuthError::Configuration(format!("invalid bridge URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: http_client(config.request_timeout())?,
            base,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source used for client-side expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        self.base
            .join(path)
            .map_err(|e| AuthError::Configuration(format!("invalid endpoint {path}: {e}")))
    }

    /// Redeem an authorization code (and optional PKCE verifier) for both pairs.
    ///
    /// # Errors
    ///
    /// - `AuthError::IdentityExchangeFailed` carrying the server's status and error body
    /// - `AuthError::Transport` on network failure
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> AuthResult<TokenExchangeResponse> {
        let mut form = vec![("code", code)];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(self.endpoint(TOKEN_PATH)?)
            .form(&form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        if !(200..300).contains(&status) {
            let err = parse_error(&body);
            warn!(status, error = %err.error, "Identity exchange rejected by bridge");
            return Err(AuthError::IdentityExchangeFailed {
                status,
                message: err.detail().to_string(),
                error: err.error,
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> AuthResult<Result<R, (u16, ErrorBody)>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self.http.post(self.endpoint(path)?).json(body).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        if (200..300).contains(&status) {
            Ok(Ok(serde_json::from_slice(&bytes)?))
        } else {
            Ok(Err((status, parse_error(&bytes))))
        }
    }
}

fn parse_error(body: &[u8]) -> ErrorBody {
    serde_json::from_slice(body).unwrap_or_else(|_| ErrorBody::new("unknown_error"))
}

#[async_trait]
impl SessionAuthority for BridgeClient {
    fn verify_access(&self, access_token: &str) -> AuthResult<UserIdentity> {
        let claims: Claims = TokenCodec::decode_unsafe(access_token)?;
        if claims.kind != TokenKind::Access {
            return Err(AuthError::WrongTokenKind {
                expected: TokenKind::Access,
                found: claims.kind,
            });
        }
        if self.clock.unix_now() > claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(UserIdentity::from(claims))
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<SessionPair> {
        let request = SessionRefreshRequest {
            refresh_token: Some(refresh_token.to_string()),
        };
        match self
            .post_json::<_, SessionRefreshResponse>(REFRESH_PATH, &request)
            .await?
        {
            Ok(SessionRefreshResponse {
                access_token,
                refresh_token: Some(refresh_token),
                ..
            }) => {
                debug!("Session pair refreshed by bridge");
                Ok(SessionPair {
                    access_token,
                    refresh_token,
                })
            }
            Ok(_) => Err(AuthError::Transport(
                "refresh response carried no refresh token".to_string(),
            )),
            Err((status, body)) => Err(AuthError::RefreshRejected {
                status,
                message: body.detail().to_string(),
            }),
        }
    }
}

#[async_trait]
impl BackendTokenBridge for BridgeClient {
    async fn convert(&self, _identity_assertion: &str) -> AuthResult<BackendPair> {
        Err(AuthError::Unsupported(
            "backend conversion happens inside the identity exchange".to_string(),
        ))
    }

    async fn refresh(&self, backend_refresh_token: &str) -> AuthResult<BackendPair> {
        let request = BackendRefreshRequest {
            backend_refresh_token: Some(backend_refresh_token.to_string()),
        };
        match self
            .post_json::<_, BackendRefreshResponse>(BACKEND_REFRESH_PATH, &request)
            .await?
        {
            Ok(body) => Ok(body.into()),
            Err((status, body)) => Err(AuthError::BackendExchangeFailed {
                status,
                message: body.detail().to_string(),
                error: body.error,
            }),
        }
    }
}
