//! # dualauth-server
//!
//! HTTP bridge server for [`dualauth`]. It redeems identity-provider
//! authorization codes for a session pair plus a backend pair, rotates
//! session pairs, and proxies backend refreshes so clients never hold the
//! signing secret or the resource-server client credentials.
//!
//! ## Endpoints
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `POST` | `/api/auth/token` | form `code`, `code_verifier?` | `TokenExchangeResponse` |
//! | `POST` | `/api/auth/refresh` | JSON/form `refreshToken`, or bearer access token | `SessionRefreshResponse` |
//! | `POST` | `/api/auth/apirefresh` | JSON `backendRefreshToken` | `BackendRefreshResponse` |
//! | `GET`  | `/api/auth/session` | bearer access token | `UserIdentity` |
//! | `GET`  | `/health` | | `{"status":"ok"}` |
//!
//! Errors are `{"error": ..., "message"?: ..., "error_description"?: ...}`.

pub mod cli;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use dualauth::{BackendTokenManager, IdentityBridge, IdentityProvider, SessionTokenManager};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, ServerError, ServerResult};

/// Largest request body accepted by any endpoint
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Shared state of every handler
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session pair issuance and verification
    pub session: Arc<SessionTokenManager>,
    /// Identity assertion decoding
    pub identity: IdentityBridge,
    /// Backend pair conversion and refresh
    pub backend: Arc<BackendTokenManager>,
    /// Authorization code exchange
    pub idp: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// State over the given collaborators
    pub fn new(
        session: SessionTokenManager,
        backend: BackendTokenManager,
        idp: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            session: Arc::new(session),
            identity: IdentityBridge::new(),
            backend: Arc::new(backend),
            idp,
        }
    }
}

/// Build the bridge router
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/session", get(handlers::session))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_session,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/auth/token", post(handlers::token))
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/auth/apirefresh", post(handlers::backend_refresh))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `ServerError::Serve` if the server stops with an I/O error.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "dualauth-server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("dualauth-server stopped");
    Ok(())
}
