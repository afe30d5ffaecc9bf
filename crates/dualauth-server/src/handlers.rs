//! Endpoint handlers
//!
//! - `POST /api/auth/token` redeems an authorization code for both token pairs
//! - `POST /api/auth/refresh` rotates the session pair
//! - `POST /api/auth/apirefresh` refreshes the backend pair
//! - `GET /api/auth/session` returns the caller's identity
//! - `GET /health` reports liveness

use axum::extract::{Extension, Form, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::{Json, response::IntoResponse};
use bytes::Bytes;
use dualauth::wire::{
    BackendRefreshRequest, BackendRefreshResponse, SessionRefreshRequest, SessionRefreshResponse,
    TokenExchangeResponse,
};
use dualauth::{AuthError, UserIdentity};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::bearer_token;

/// Warning attached to a refresh served from the access token alone
pub const FALLBACK_WARNING: &str = "Using access token fallback - refresh token missing";

/// Form body of the identity exchange
#[derive(Debug, Default, Deserialize)]
pub struct TokenForm {
    /// Authorization code from the identity provider
    #[serde(default)]
    pub code: Option<String>,
    /// PKCE verifier matching the code challenge, if one was sent
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "dualauth-server",
    }))
}

/// `POST /api/auth/token`
///
/// # Errors
///
/// - `400` when the code is missing or the identity provider rejects it
/// - the resource server's status when the backend conversion fails
pub async fn token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenExchangeResponse>, ApiError> {
    let Some(code) = form.code.filter(|code| !code.is_empty()) else {
        return Err(ApiError::bad_request("Missing authorization code"));
    };

    let assertion = state
        .idp
        .exchange_code(&code, form.code_verifier.as_deref())
        .await
        .map_err(|err| match err {
            AuthError::IdentityExchangeFailed { ref error, .. } if error == "missing_id_token" => {
                ApiError::bad_request("Missing required parameters")
            }
            AuthError::IdentityExchangeFailed { .. } => ApiError::from(err),
            other => {
                error!(provider = state.idp.name(), error = %other, "Authorization code exchange failed");
                ApiError::bad_request("Missing required parameters")
            }
        })?;

    let backend = state
        .backend
        .obtain_initial(&assertion)
        .await
        .map_err(|err| match err {
            AuthError::BackendExchangeFailed { .. } => ApiError::from(err),
            other => {
                error!(error = %other, "Backend token conversion failed");
                ApiError::internal("Failed to convert token")
                    .with_message("An error occurred while converting the token")
            }
        })?;

    let identity = state
        .identity
        .exchange_assertion(&assertion)
        .map_err(|err| {
            warn!(error = %err, "Identity assertion rejected");
            ApiError::bad_request("Missing required parameters").with_message(err.to_string())
        })?;
    let session = state.session.issue_initial_pair(&identity)?;

    info!(subject = %identity.subject, "Signed in");
    Ok(Json(TokenExchangeResponse::new(session, backend.pair)))
}

/// `POST /api/auth/refresh`
///
/// The refresh token is read from a JSON or form body. Without one, a valid
/// bearer access token is reissued instead and the response carries a
/// warning and no refresh token.
///
/// # Errors
///
/// `401` for every credential failure, `500` for signing failures.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SessionRefreshResponse>, ApiError> {
    let Some(refresh_token) = refresh_token_from_body(&headers, &body) else {
        return refresh_from_access_token(&state, &headers);
    };

    match state.session.refresh(&refresh_token) {
        Ok(pair) => Ok(Json(SessionRefreshResponse::from(pair))),
        Err(err) => Err(refresh_error(err)),
    }
}

fn refresh_from_access_token(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Json<SessionRefreshResponse>, ApiError> {
    let Some(access_token) = bearer_token(headers) else {
        return Err(ApiError::unauthorized(
            "Authentication required - no refresh token",
        ));
    };

    match state.session.reissue_access(access_token) {
        Ok(access_token) => Ok(Json(SessionRefreshResponse {
            access_token,
            refresh_token: None,
            warning: Some(FALLBACK_WARNING.to_string()),
        })),
        Err(err) if err.is_verification_failure() => {
            debug!(error = %err, "Access token fallback rejected");
            Err(ApiError::unauthorized(
                "Authentication required - no valid refresh token",
            ))
        }
        Err(err) => {
            error!(error = %err, "Access token reissue failed");
            Err(ApiError::internal("Failed to refresh token"))
        }
    }
}

fn refresh_error(err: AuthError) -> ApiError {
    match err {
        AuthError::Expired => {
            ApiError::unauthorized("Refresh token expired, please sign in again")
        }
        AuthError::WrongTokenKind { .. } => {
            ApiError::unauthorized("Invalid token type, please sign in again")
        }
        AuthError::MissingSubject => {
            ApiError::unauthorized("Invalid token, missing subject")
        }
        err if err.is_verification_failure() => {
            debug!(error = %err, "Refresh token rejected");
            ApiError::unauthorized("Invalid refresh token, please sign in again")
        }
        other => {
            error!(error = %other, "Session refresh failed");
            ApiError::internal("Failed to refresh token")
        }
    }
}

/// Refresh token from a JSON or urlencoded body; unparseable bodies count as absent
fn refresh_token_from_body(headers: &HeaderMap, body: &Bytes) -> Option<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let token = if content_type.contains("application/json") {
        match serde_json::from_slice::<SessionRefreshRequest>(body) {
            Ok(request) => request.refresh_token,
            Err(err) => {
                debug!(error = %err, "Ignoring unparseable JSON refresh body");
                None
            }
        }
    } else if content_type.contains("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "refreshToken")
            .map(|(_, value)| value.into_owned())
    } else {
        None
    };

    token.filter(|token| !token.is_empty())
}

/// `POST /api/auth/apirefresh`
///
/// # Errors
///
/// - `400` when no backend refresh token is sent
/// - the resource server's status when it rejects the refresh
/// - `500` when the resource server cannot be reached
pub async fn backend_refresh(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BackendRefreshResponse>, ApiError> {
    let request: BackendRefreshRequest = serde_json::from_slice(&body).unwrap_or_default();
    let Some(refresh_token) = request.backend_refresh_token.filter(|t| !t.is_empty()) else {
        return Err(ApiError::bad_request("Missing backend refresh token"));
    };

    match state.backend.refresh(&refresh_token).await {
        Ok(grant) => Ok(Json(BackendRefreshResponse::from(grant.pair))),
        Err(err @ AuthError::BackendExchangeFailed { .. }) => Err(ApiError::from(err)),
        Err(err) => {
            warn!(error = %err, "Backend refresh could not reach the resource server");
            Err(ApiError::internal("Failed to refresh backend token"))
        }
    }
}

/// `GET /api/auth/session`
pub async fn session(Extension(identity): Extension<UserIdentity>) -> Json<UserIdentity> {
    Json(identity)
}
