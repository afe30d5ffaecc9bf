//! Error types for the token lifecycle engine
//!
//! Every fallible operation in this crate returns [`AuthResult`]. Errors carry
//! a [`FailureClass`] so the orchestrator can decide between ending the
//! session (terminal) and surfacing the failure while keeping the session
//! (transient).

use crate::jwt::TokenKind;

/// How a failure affects the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// The credentials can never succeed again; the session must end
    Terminal,
    /// The failure may clear up on its own; the session is kept
    Transient,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal => write!(f, "terminal"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Errors produced by the token engine, the bridges and the orchestrator
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Token is not a well-formed signed claim set
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Token verified but carries an empty `sub` claim
    #[error("Token has no subject")]
    MissingSubject,

    /// Signature does not match the payload under the configured key
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Token is past its `exp` claim
    #[error("Token expired")]
    Expired,

    /// An access token was presented where a refresh token is required, or the reverse
    #[error("Wrong token kind: expected {expected}, found {found}")]
    WrongTokenKind {
        /// Kind the operation requires
        expected: TokenKind,
        /// Kind carried by the token
        found: TokenKind,
    },

    /// Identity assertion has no usable subject
    #[error("Incomplete identity: {0}")]
    IncompleteIdentity(String),

    /// Identity provider refused the authorization code exchange
    #[error("Identity exchange failed ({status}): {error}: {message}")]
    IdentityExchangeFailed {
        /// HTTP status returned by the identity provider
        status: u16,
        /// OAuth error code
        error: String,
        /// Human-readable description
        message: String,
    },

    /// Resource server refused a convert or refresh request
    #[error("Backend token exchange failed ({status}): {error}: {message}")]
    BackendExchangeFailed {
        /// HTTP status returned by the resource server
        status: u16,
        /// OAuth error code
        error: String,
        /// Human-readable description
        message: String,
    },

    /// Bridge server refused a session refresh
    #[error("Session refresh rejected ({status}): {message}")]
    RefreshRejected {
        /// HTTP status returned by the bridge server
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// Network or protocol failure talking to a remote party
    #[error("Transport error: {0}")]
    Transport(String),

    /// Persistent store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation is not offered by this implementation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// No session is established
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Session was ended by a terminal refresh failure
    #[error("Session ended, please sign in again: {0}")]
    SessionEnded(String),
}

impl AuthError {
    /// Classify the failure for session handling.
    ///
    /// Auth-rejecting backend responses are 401, 403, or 400 with
    /// `invalid_grant`. Every other backend status is transient.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Malformed(_)
            | Self::MissingSubject
            | Self::InvalidSignature
            | Self::Expired
            | Self::WrongTokenKind { .. }
            | Self::IncompleteIdentity(_)
            | Self::NotAuthenticated
            | Self::SessionEnded(_) => FailureClass::Terminal,
            Self::BackendExchangeFailed { status, error, .. } => {
                if is_auth_rejection(*status, error) {
                    FailureClass::Terminal
                } else {
                    FailureClass::Transient
                }
            }
            Self::RefreshRejected { status, .. } => {
                if matches!(status, 401 | 403) {
                    FailureClass::Terminal
                } else {
                    FailureClass::Transient
                }
            }
            Self::IdentityExchangeFailed { .. }
            | Self::Transport(_)
            | Self::Storage(_)
            | Self::Configuration(_)
            | Self::Serialization(_)
            | Self::Unsupported(_) => FailureClass::Transient,
        }
    }

    /// Whether this failure must end the session
    pub fn is_terminal(&self) -> bool {
        self.class() == FailureClass::Terminal
    }

    /// Whether this is a token verification failure
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_)
                | Self::MissingSubject
                | Self::InvalidSignature
                | Self::Expired
                | Self::WrongTokenKind { .. }
        )
    }
}

/// Resource-server statuses that mean the presented credential is dead
pub(crate) fn is_auth_rejection(status: u16, error: &str) -> bool {
    matches!(status, 401 | 403) || (status == 400 && error == "invalid_grant")
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for token engine operations
pub type AuthResult<T> = Result<T, AuthError>;
