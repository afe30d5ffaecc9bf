//! Common test utilities for server tests
//!
//! Scripted identity provider and resource-server bridge, a state builder
//! with a settable clock, and a helper driving the router with `oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dualauth::{
    AuthError, AuthResult, BackendPair, BackendTokenBridge, BackendTokenManager, IdentityProvider,
    ManualClock, SessionTokenManager, SigningKey, TokenCodec, TokenPolicy,
};
use dualauth_server::AppState;
use serde_json::{Value, json};
use tower::ServiceExt;

pub const SECRET: &str = "server-test-secret-at-least-32-bytes";
pub const T0: i64 = 1_700_000_000;
pub const SUBJECT: &str = "109876543210";

/// Unsigned JWT with the given payload, as an identity provider would return it
pub fn assertion(payload: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
    format!("{header}.{body}.signature")
}

/// Google-style id-token for the test user
pub fn google_assertion() -> String {
    assertion(json!({
        "iss": "https://accounts.google.com",
        "sub": SUBJECT,
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "picture": "https://example.com/ada.png",
        "given_name": "Ada",
        "family_name": "Lovelace",
        "email_verified": true,
        "exp": T0 + 3600,
    }))
}

/// Identity provider answering every code the same way
#[derive(Debug)]
pub enum StubProvider {
    Assertion(String),
    Rejects,
    NoIdToken,
}

#[async_trait]
impl IdentityProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn exchange_code(&self, _code: &str, _code_verifier: Option<&str>) -> AuthResult<String> {
        match self {
            Self::Assertion(token) => Ok(token.clone()),
            Self::Rejects => Err(AuthError::IdentityExchangeFailed {
                status: 400,
                error: "invalid_grant".into(),
                message: "Bad Request".into(),
            }),
            Self::NoIdToken => Err(AuthError::IdentityExchangeFailed {
                status: 200,
                error: "missing_id_token".into(),
                message: "identity provider response has no id_token".into(),
            }),
        }
    }
}

/// Resource server answering every request the same way
#[derive(Debug)]
pub enum StubBridge {
    Issues,
    Rejects(u16, &'static str),
    Unreachable,
}

impl StubBridge {
    fn answer(&self, access: &str, refresh: &str) -> AuthResult<BackendPair> {
        match self {
            Self::Issues => Ok(BackendPair {
                access_token: access.into(),
                refresh_token: refresh.into(),
                expires_in_seconds: 36000,
            }),
            Self::Rejects(status, error) => Err(AuthError::BackendExchangeFailed {
                status: *status,
                error: (*error).into(),
                message: "rejected by resource server".into(),
            }),
            Self::Unreachable => Err(AuthError::Transport("connection refused".into())),
        }
    }
}

#[async_trait]
impl BackendTokenBridge for StubBridge {
    async fn convert(&self, _identity_assertion: &str) -> AuthResult<BackendPair> {
        self.answer("backend-1", "backend-refresh-1")
    }

    async fn refresh(&self, _backend_refresh_token: &str) -> AuthResult<BackendPair> {
        self.answer("backend-2", "backend-refresh-2")
    }
}

/// Router state over stub collaborators and a clock frozen at [`T0`]
pub struct TestApp {
    pub clock: Arc<ManualClock>,
    pub state: AppState,
}

impl TestApp {
    pub fn new(provider: StubProvider, bridge: StubBridge) -> Self {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let codec =
            TokenCodec::new(&SigningKey::new(SECRET).unwrap()).with_clock(clock.clone());
        let session = SessionTokenManager::new(codec, TokenPolicy::default()).unwrap();
        let backend = BackendTokenManager::new(Arc::new(bridge)).with_clock(clock.clone());
        Self {
            clock,
            state: AppState::new(session, backend, Arc::new(provider)),
        }
    }

    pub fn default_app() -> Self {
        Self::new(StubProvider::Assertion(google_assertion()), StubBridge::Issues)
    }

    pub fn router(&self) -> Router {
        dualauth_server::router(self.state.clone())
    }

    /// Send a request and return the status and JSON body (`Null` if empty)
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

pub fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn json_post(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
