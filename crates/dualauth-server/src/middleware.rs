//! Bearer-token middleware
//!
//! [`require_session`] verifies `Authorization: Bearer <access token>` and
//! inserts the [`UserIdentity`] into the request extensions for handlers.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use dualauth::{AuthError, UserIdentity};
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

/// Token carried by an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reject requests without a valid session access token.
///
/// # Errors
///
/// `401` with `Authentication required`, `Token expired` or `Invalid token`.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(request.headers()) else {
        return Err(ApiError::unauthorized("Authentication required"));
    };

    let identity: UserIdentity = match state.session.verify_access(token) {
        Ok(identity) => identity,
        Err(AuthError::Expired) => {
            debug!("Rejected expired access token");
            return Err(ApiError::unauthorized("Token expired"));
        }
        Err(err) => {
            debug!(error = %err, "Rejected access token");
            return Err(ApiError::unauthorized("Invalid token"));
        }
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
