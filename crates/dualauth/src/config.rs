//! Configuration Types
//!
//! Token lifetimes, identity provider and resource-server credentials, and
//! the bridge client's endpoint settings.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Google's OAuth 2.0 token endpoint
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Backend name the resource server expects for Google identity tokens
pub const DEFAULT_BACKEND_NAME: &str = "google-identity";

/// Lifetimes of the session pair and the backend refresh buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPolicy {
    /// Access token lifetime in seconds
    #[serde(default = "default_access_lifetime")]
    pub access_lifetime_secs: u64,
    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_lifetime")]
    pub refresh_lifetime_secs: u64,
    /// How long before backend expiry the proactive refresh fires
    #[serde(default = "default_backend_refresh_buffer")]
    pub backend_refresh_buffer_secs: u64,
}

fn default_access_lifetime() -> u64 {
    20
}

fn default_refresh_lifetime() -> u64 {
    30 * 24 * 60 * 60
}

fn default_backend_refresh_buffer() -> u64 {
    60
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_lifetime_secs: default_access_lifetime(),
            refresh_lifetime_secs: default_refresh_lifetime(),
            backend_refresh_buffer_secs: default_backend_refresh_buffer(),
        }
    }
}

impl TokenPolicy {
    /// Access token lifetime
    pub fn access_lifetime(&self) -> Duration {
        Duration::from_secs(self.access_lifetime_secs)
    }

    /// Refresh token lifetime
    pub fn refresh_lifetime(&self) -> Duration {
        Duration::from_secs(self.refresh_lifetime_secs)
    }

    /// Backend proactive refresh buffer
    pub fn backend_refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.backend_refresh_buffer_secs)
    }

    /// Set the access lifetime
    pub fn with_access_lifetime(mut self, lifetime: Duration) -> Self {
        self.access_lifetime_secs = lifetime.as_secs();
        self
    }

    /// Set the refresh lifetime
    pub fn with_refresh_lifetime(mut self, lifetime: Duration) -> Self {
        self.refresh_lifetime_secs = lifetime.as_secs();
        self
    }

    /// Check that an access token always expires before its sibling refresh token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` for zero lifetimes or an access
    /// lifetime not strictly below the refresh lifetime.
    pub fn validate(&self) -> AuthResult<()> {
        if self.access_lifetime_secs == 0 || self.refresh_lifetime_secs == 0 {
            return Err(AuthError::Configuration(
                "token lifetimes must be non-zero".to_string(),
            ));
        }
        if self.access_lifetime_secs >= self.refresh_lifetime_secs {
            return Err(AuthError::Configuration(format!(
                "access lifetime ({}s) must be shorter than refresh lifetime ({}s)",
                self.access_lifetime_secs, self.refresh_lifetime_secs
            )));
        }
        Ok(())
    }
}

/// Google OAuth client used for the authorization code exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_secret: SecretString,
    /// Redirect URI registered for the client
    pub redirect_uri: String,
    /// Token endpoint
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
}

fn default_google_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

impl GoogleConfig {
    /// Config against Google's production token endpoint
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            redirect_uri: redirect_uri.into(),
            token_url: default_google_token_url(),
        }
    }

    /// Override the token endpoint
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

/// Resource-server client credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Endpoint converting an identity assertion into a backend pair
    pub convert_url: String,
    /// Endpoint refreshing a backend pair
    pub token_url: String,
    /// Client id registered with the resource server
    pub client_id: String,
    /// Client secret registered with the resource server
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_secret: SecretString,
    /// Social backend name sent with every request
    #[serde(default = "default_backend_name")]
    pub backend: String,
}

fn default_backend_name() -> String {
    DEFAULT_BACKEND_NAME.to_string()
}

impl BackendConfig {
    /// Endpoints derived from the resource server's base URL
    /// (`{base}/auth/convert-token` and `{base}/auth/token`)
    pub fn from_base_url(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            convert_url: format!("{base}/auth/convert-token"),
            token_url: format!("{base}/auth/token"),
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            backend: default_backend_name(),
        }
    }
}

/// Bridge server location for the client side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the bridge server
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl ClientConfig {
    /// Config with the default timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Custom serialization for SecretString
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

// Custom deserialization for SecretString
fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_defaults() {
        let policy = TokenPolicy::default();
        assert_eq!(policy.access_lifetime(), Duration::from_secs(20));
        assert_eq!(policy.refresh_lifetime(), Duration::from_secs(2_592_000));
        assert_eq!(policy.backend_refresh_buffer(), Duration::from_secs(60));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_rejects_inverted_lifetimes() {
        let policy = TokenPolicy::default()
            .with_access_lifetime(Duration::from_secs(3600))
            .with_refresh_lifetime(Duration::from_secs(60));
        assert!(matches!(policy.validate(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_policy_rejects_zero_lifetime() {
        let policy = TokenPolicy::default().with_access_lifetime(Duration::ZERO);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: TokenPolicy = serde_json::from_value(json!({"access_lifetime_secs": 300})).unwrap();
        assert_eq!(policy.access_lifetime_secs, 300);
        assert_eq!(policy.refresh_lifetime_secs, 2_592_000);
    }

    #[test]
    fn test_backend_config_from_base_url() {
        let config = BackendConfig::from_base_url("https://api.example.com/", "cid", "secret");
        assert_eq!(config.convert_url, "https://api.example.com/auth/convert-token");
        assert_eq!(config.token_url, "https://api.example.com/auth/token");
        assert_eq!(config.backend, "google-identity");
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = GoogleConfig::new("cid", "very-secret-value", "app://callback");
        assert!(!format!("{config:?}").contains("very-secret-value"));
    }
}
