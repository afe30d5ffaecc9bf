//! Bridge server request and response bodies
//!
//! Shared by `dualauth-server` and [`BridgeClient`](crate::client::BridgeClient).
//! Field names are camelCase on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{BackendPair, SessionPair};

/// Body of a successful identity exchange (`POST /api/auth/token`)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExchangeResponse {
    /// Session access token
    pub access_token: String,
    /// Session refresh token
    pub refresh_token: String,
    /// Backend access token
    pub backend_access_token: String,
    /// Backend refresh token
    pub backend_refresh_token: String,
    /// Backend access token lifetime
    pub backend_expires_in_seconds: u64,
}

impl TokenExchangeResponse {
    /// Assemble from both pairs
    pub fn new(session: SessionPair, backend: BackendPair) -> Self {
        Self {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            backend_access_token: backend.access_token,
            backend_refresh_token: backend.refresh_token,
            backend_expires_in_seconds: backend.expires_in_seconds,
        }
    }

    /// Session pair half
    pub fn session_pair(&self) -> SessionPair {
        SessionPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    /// Backend pair half
    pub fn backend_pair(&self) -> BackendPair {
        BackendPair {
            access_token: self.backend_access_token.clone(),
            refresh_token: self.backend_refresh_token.clone(),
            expires_in_seconds: self.backend_expires_in_seconds,
        }
    }
}

impl fmt::Debug for TokenExchangeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchangeResponse")
            .field("backend_expires_in_seconds", &self.backend_expires_in_seconds)
            .finish_non_exhaustive()
    }
}

/// Body of `POST /api/auth/refresh`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefreshRequest {
    /// Refresh token; absent when the client relies on the bearer fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Response of `POST /api/auth/refresh`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefreshResponse {
    /// New access token
    pub access_token: String,
    /// Rotated refresh token; absent on the bearer fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Set when the access token was reissued without a refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<SessionPair> for SessionRefreshResponse {
    fn from(pair: SessionPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: Some(pair.refresh_token),
            warning: None,
        }
    }
}

/// Body of `POST /api/auth/apirefresh`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRefreshRequest {
    /// Backend refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_refresh_token: Option<String>,
}

/// Response of `POST /api/auth/apirefresh`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRefreshResponse {
    /// New backend access token
    pub backend_access_token: String,
    /// New backend refresh token
    pub backend_refresh_token: String,
    /// Backend access token lifetime
    pub backend_expires_in_seconds: u64,
}

impl From<BackendPair> for BackendRefreshResponse {
    fn from(pair: BackendPair) -> Self {
        Self {
            backend_access_token: pair.access_token,
            backend_refresh_token: pair.refresh_token,
            backend_expires_in_seconds: pair.expires_in_seconds,
        }
    }
}

impl From<BackendRefreshResponse> for BackendPair {
    fn from(body: BackendRefreshResponse) -> Self {
        Self {
            access_token: body.backend_access_token,
            refresh_token: body.backend_refresh_token,
            expires_in_seconds: body.backend_expires_in_seconds,
        }
    }
}

/// Error body of every bridge endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code or message
    pub error: String,
    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// OAuth-style description, passed through from the identity provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorBody {
    /// Body with only an error string
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }

    /// Add a message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add an OAuth description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    /// Best human-readable text in the body
    pub fn detail(&self) -> &str {
        self.message
            .as_deref()
            .or(self.error_description.as_deref())
            .unwrap_or(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exchange_response_field_names() {
        let body = TokenExchangeResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            backend_access_token: "ba".into(),
            backend_refresh_token: "br".into(),
            backend_expires_in_seconds: 3600,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "accessToken": "a",
                "refreshToken": "r",
                "backendAccessToken": "ba",
                "backendRefreshToken": "br",
                "backendExpiresInSeconds": 3600,
            })
        );
        assert!(!format!("{body:?}").contains("\"a\""));
    }

    #[test]
    fn test_fallback_refresh_response_omits_refresh_token() {
        let body = SessionRefreshResponse {
            access_token: "a".into(),
            refresh_token: None,
            warning: Some("Using access token fallback - refresh token missing".into()),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("refreshToken").is_none());
        assert_eq!(value["warning"], "Using access token fallback - refresh token missing");
    }

    #[test]
    fn test_error_body_detail_preference() {
        assert_eq!(ErrorBody::new("invalid_grant").detail(), "invalid_grant");
        assert_eq!(
            ErrorBody::new("invalid_grant").with_description("Bad Request").detail(),
            "Bad Request"
        );
        assert_eq!(
            ErrorBody::new("x").with_description("d").with_message("m").detail(),
            "m"
        );
    }
}
