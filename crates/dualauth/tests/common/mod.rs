//! Common test utilities for integration tests
//!
//! Mock resource server, mock bridge server, an event recorder, and helpers
//! for building orchestrators wired to them.

#![allow(dead_code)]

use std::sync::Arc;

use dualauth::wire::TokenExchangeResponse;
use dualauth::{
    BackendConfig, BackendPair, BackendTokenBridge, BackendTokenManager, HttpBackendBridge,
    KeyValueStore, MemoryStore, ReqwestTransport, SessionAuthority, SessionEvent, SessionObserver,
    SessionOrchestrator, SessionTokenManager, SigningKey, TokenCodec, TokenPolicy, UserIdentity,
    UserProfile,
};
use parking_lot::Mutex;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

pub const SECRET: &str = "integration-test-secret-at-least-32-bytes";

/// Session manager over the wall clock with default lifetimes
pub fn session_manager() -> Arc<SessionTokenManager> {
    let codec = TokenCodec::new(&SigningKey::new(SECRET).unwrap());
    Arc::new(SessionTokenManager::new(codec, TokenPolicy::default()).unwrap())
}

/// The user every test signs in as
pub fn ada() -> UserIdentity {
    UserIdentity::new("109876543210").with_profile(UserProfile {
        name: Some("Ada Lovelace".into()),
        email: Some("ada@example.com".into()),
        picture: Some("https://example.com/ada.png".into()),
        ..Default::default()
    })
}

/// Identity exchange result carrying a fresh session pair and the given backend tokens
pub fn sign_in_tokens(
    sessions: &SessionTokenManager,
    backend_access: &str,
    backend_refresh: &str,
) -> TokenExchangeResponse {
    TokenExchangeResponse::new(
        sessions.issue_initial_pair(&ada()).unwrap(),
        BackendPair {
            access_token: backend_access.into(),
            refresh_token: backend_refresh.into(),
            expires_in_seconds: 3600,
        },
    )
}

/// Records every event it receives
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &SessionEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Resource server speaking the convert-token protocol
pub struct MockResourceServer {
    pub server: MockServer,
}

impl MockResourceServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn config(&self) -> BackendConfig {
        BackendConfig::from_base_url(&self.server.uri(), "test-client", "test-secret")
    }

    pub fn bridge(&self) -> Arc<HttpBackendBridge> {
        Arc::new(HttpBackendBridge::new(self.config()).unwrap())
    }

    /// Mock a successful refresh of `refresh_token`
    pub async fn mock_refresh_success(&self, refresh_token: &str, access: &str, refresh: &str) {
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .and(body_partial_json(json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access,
                "refresh_token": refresh,
                "expires_in": 3600,
                "token_type": "Bearer",
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock a refresh error response
    pub async fn mock_refresh_error(&self, status: u16, error: &str, description: &str) {
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": error,
                "error_description": description,
            })))
            .mount(&self.server)
            .await;
    }
}

/// Orchestrator over an in-process session manager and the given backend bridge
pub struct Harness {
    pub sessions: Arc<SessionTokenManager>,
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingObserver>,
    pub orchestrator: Arc<SessionOrchestrator>,
}

impl Harness {
    pub fn new(bridge: Arc<dyn BackendTokenBridge>) -> Self {
        let sessions = session_manager();
        Self::with_authority(sessions.clone(), sessions, bridge)
    }

    pub fn with_authority(
        sessions: Arc<SessionTokenManager>,
        authority: Arc<dyn SessionAuthority>,
        bridge: Arc<dyn BackendTokenBridge>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingObserver::default());
        let orchestrator = SessionOrchestrator::builder(
            authority,
            BackendTokenManager::new(bridge),
            store.clone() as Arc<dyn KeyValueStore>,
        )
        .transport(Arc::new(ReqwestTransport::new().unwrap()))
        .observer(events.clone())
        .build()
        .unwrap();

        Self {
            sessions,
            store,
            events,
            orchestrator,
        }
    }

    /// Sign in with backend tokens `backend-1` / `backend-refresh-1`
    pub async fn sign_in(&self) -> TokenExchangeResponse {
        let tokens = sign_in_tokens(&self.sessions, "backend-1", "backend-refresh-1");
        self.orchestrator.establish(tokens.clone()).await.unwrap();
        tokens
    }
}
