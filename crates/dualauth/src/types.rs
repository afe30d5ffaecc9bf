//! Core Authentication Types
//!
//! Token pairs, the verified user identity and the client-held session
//! aggregate shared by the managers and the orchestrator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jwt::{Claims, UserProfile};

/// Verified user identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user identifier
    pub subject: String,
    /// Profile fields
    #[serde(flatten)]
    pub profile: UserProfile,
}

impl UserIdentity {
    /// Identity with no profile fields
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            profile: UserProfile::default(),
        }
    }

    /// Set the profile
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }
}

impl From<Claims> for UserIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            profile: claims.profile,
        }
    }
}

/// Internal session access/refresh pair, verified locally
#[derive(Clone, PartialEq, Eq)]
pub struct SessionPair {
    /// Short-lived access token
    pub access_token: String,
    /// Long-lived refresh token
    pub refresh_token: String,
}

impl fmt::Debug for SessionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Opaque resource-server access/refresh pair
#[derive(Clone, PartialEq, Eq)]
pub struct BackendPair {
    /// Backend access token
    pub access_token: String,
    /// Backend refresh token
    pub refresh_token: String,
    /// Lifetime of the access token as reported by the resource server
    pub expires_in_seconds: u64,
}

impl fmt::Debug for BackendPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

/// Backend pair with its locally tracked expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendGrant {
    /// Token pair
    pub pair: BackendPair,
    /// Instant the access token stops working
    pub expires_at: DateTime<Utc>,
}

/// Token family, coordinated independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFamily {
    /// Internal session pair
    Session,
    /// Resource-server pair
    Backend,
}

impl fmt::Display for TokenFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Backend => write!(f, "backend"),
        }
    }
}

/// Client-held session aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Identity derived from the session access token
    pub user: UserIdentity,
    /// Session pair
    pub tokens: SessionPair,
    /// Backend pair, when the resource server issued one
    pub backend: Option<BackendGrant>,
}

impl Session {
    /// Current access token for a family
    pub fn access_token(&self, family: TokenFamily) -> Option<&str> {
        match family {
            TokenFamily::Session => Some(self.tokens.access_token.as_str()),
            TokenFamily::Backend => self.backend.as_ref().map(|b| b.pair.access_token.as_str()),
        }
    }

    /// Current refresh token for a family
    pub fn refresh_token(&self, family: TokenFamily) -> Option<&str> {
        match family {
            TokenFamily::Session => Some(self.tokens.refresh_token.as_str()),
            TokenFamily::Backend => self.backend.as_ref().map(|b| b.pair.refresh_token.as_str()),
        }
    }
}
