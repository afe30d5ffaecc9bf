//! Signed token infrastructure
//!
//! Session tokens are compact HS256 JWTs: three base64url segments (header,
//! payload, signature) joined by `.`, with a flat JSON claim set as payload.
//!
//! # Claim layout
//!
//! ```text
//! {
//!   "sub": "1098...",          subject, always present
//!   "iat": 1700000000,         issued-at, seconds since epoch
//!   "exp": 1700000020,         expiry, seconds since epoch
//!   "type": "access",          "access" | "refresh"
//!   "jti": "6f1c...",          refresh tokens only, unique per issuance
//!   "name": "...", "email": "...", "picture": "...",
//!   "given_name": "...", "family_name": "...", "email_verified": true
//! }
//! ```
//!
//! Refresh tokens embed the whole profile so a refresh can mint a complete
//! access token without a user lookup.
//!
//! # Modules
//!
//! - `codec` - issuing, verifying and unverified decoding

pub mod codec;

pub use codec::{SigningKey, TokenCodec};

use serde::{Deserialize, Serialize};

/// Discriminates the two members of a session pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived bearer credential
    Access,
    /// Long-lived credential exchanged for a new pair
    Refresh,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// User profile fields carried inside session tokens and identity assertions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Whether the identity provider verified the email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// Avatar used when a refresh token carries no picture
pub const PLACEHOLDER_PICTURE: &str = "https://ui-avatars.com/api/?name=User&background=random";

impl UserProfile {
    /// Whether the display fields a client renders are all present
    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.email.is_some() && self.picture.is_some()
    }

    /// Fill missing display fields with placeholders derived from `subject`
    pub fn with_placeholders(mut self, subject: &str) -> Self {
        let short: String = subject.chars().take(6).collect();
        if self.name.is_none() {
            self.name = Some(format!("User {short}"));
        }
        if self.email.is_none() {
            self.email = Some(format!("user-{short}@example.com"));
        }
        if self.picture.is_none() {
            self.picture = Some(PLACEHOLDER_PICTURE.to_string());
        }
        self
    }
}

/// Claim set of a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (stable user identifier)
    pub sub: String,

    /// Issued at, seconds since epoch
    pub iat: i64,

    /// Expires at, seconds since epoch
    pub exp: i64,

    /// Access or refresh
    #[serde(rename = "type")]
    pub kind: TokenKind,

    /// Unique id of a refresh token issuance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Embedded user profile
    #[serde(flatten)]
    pub profile: UserProfile,
}

impl Claims {
    /// Unstamped access claims; the codec sets `iat` and `exp` on issue
    pub fn access(subject: impl Into<String>, profile: UserProfile) -> Self {
        Self {
            sub: subject.into(),
            iat: 0,
            exp: 0,
            kind: TokenKind::Access,
            jti: None,
            profile,
        }
    }

    /// Unstamped refresh claims with a fresh token id
    pub fn refresh(subject: impl Into<String>, profile: UserProfile) -> Self {
        Self {
            sub: subject.into(),
            iat: 0,
            exp: 0,
            kind: TokenKind::Refresh,
            jti: Some(uuid::Uuid::new_v4().to_string()),
            profile,
        }
    }

    /// Lifetime encoded in the token, in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.exp - self.iat
    }
}
