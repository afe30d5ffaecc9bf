//! Error types for the bridge server
//!
//! [`ServerError`] covers startup and serving failures. [`ApiError`] is what
//! handlers return; it renders as `{error, message?, error_description?}`
//! with the endpoint's status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dualauth::AuthError;
use dualauth::wire::ErrorBody;
use thiserror::Error;

/// Result type for server startup and serving
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Startup and serving failures
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// Invalid flags or environment
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The listen address could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    /// Token engine setup failed
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Error response of a bridge endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// Error with a status and an `error` string
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::new(error),
        }
    }

    /// `400 Bad Request`
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// `401 Unauthorized`
    pub fn unauthorized(error: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error)
    }

    /// `500 Internal Server Error`
    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Add a `message`
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.body = self.body.with_message(message);
        self
    }

    /// Add an `error_description`
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.body = self.body.with_description(description);
        self
    }

    /// Response status
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response body
    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::BackendExchangeFailed {
                status,
                error,
                message,
            } => Self::new(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                error,
            )
            .with_message(message),
            AuthError::IdentityExchangeFailed { error, message, .. } => Self::bad_request(error)
                .with_description(message)
                .with_message(
                    "OAuth validation error - please ensure the app complies with Google's OAuth 2.0 policy",
                ),
            AuthError::IncompleteIdentity(reason) => {
                Self::bad_request("Missing required parameters").with_message(reason)
            }
            err if err.is_verification_failure() => Self::unauthorized("Invalid token"),
            AuthError::Transport(reason) => Self::new(StatusCode::BAD_GATEWAY, "Upstream request failed")
                .with_message(reason),
            other => {
                tracing::error!(error = %other, "Unhandled error in request handler");
                Self::internal("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_status_passthrough() {
        let err = ApiError::from(AuthError::BackendExchangeFailed {
            status: 400,
            error: "invalid_grant".into(),
            message: "Invalid refresh token".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body().error, "invalid_grant");
        assert_eq!(err.body().message.as_deref(), Some("Invalid refresh token"));
    }

    #[test]
    fn test_unknown_backend_status_becomes_bad_gateway() {
        let err = ApiError::from(AuthError::BackendExchangeFailed {
            status: 1000,
            error: "weird".into(),
            message: String::new(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_identity_failure_keeps_oauth_fields() {
        let err = ApiError::from(AuthError::IdentityExchangeFailed {
            status: 400,
            error: "invalid_grant".into(),
            message: "Bad Request".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body().error_description.as_deref(), Some("Bad Request"));
    }

    #[test]
    fn test_verification_failure_is_unauthorized() {
        assert_eq!(
            ApiError::from(AuthError::InvalidSignature).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
