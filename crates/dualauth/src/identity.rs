//! Identity Bridge
//!
//! Turns a third-party identity assertion (an OpenID Connect id-token) into a
//! [`UserIdentity`]. The assertion is read without signature verification: it
//! arrives directly from the identity provider's token endpoint over TLS.
//!
//! The authorization code exchange that produces the assertion lives behind
//! [`IdentityProvider`]; [`GoogleIdentityProvider`] is the Google
//! implementation.

use std::fmt;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GoogleConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwt::{TokenCodec, UserProfile};
use crate::transport::{DEFAULT_TIMEOUT, http_client};
use crate::types::UserIdentity;

/// Claims read from an identity assertion
#[derive(Debug, Deserialize)]
struct AssertionClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(flatten)]
    profile: UserProfile,
}

/// Extracts user identities from identity assertions
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityBridge;

impl IdentityBridge {
    /// Create a bridge
    pub fn new() -> Self {
        Self
    }

    /// Decode an identity assertion into a user identity.
    ///
    /// # Errors
    ///
    /// - `AuthError::Malformed` if the assertion is not a decodable JWT
    /// - `AuthError::IncompleteIdentity` if it carries no subject
    pub fn exchange_assertion(&self, assertion: &str) -> AuthResult<UserIdentity> {
        let claims: AssertionClaims = TokenCodec::decode_unsafe(assertion)?;

        let subject = claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| AuthError::IncompleteIdentity("assertion has no subject".to_string()))?;

        debug!(subject = %subject, "Identity assertion accepted");
        Ok(UserIdentity {
            subject,
            profile: claims.profile,
        })
    }
}

/// Exchanges an authorization code for an identity assertion
#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Redeem an authorization code (with its PKCE verifier, if one was used)
    /// and return the provider's id-token.
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> AuthResult<String>;
}

#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// OAuth error body (`{error, error_description}`)
#[derive(Debug, Default, Deserialize)]
pub(crate) struct OAuthErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    pub(crate) fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Google's authorization code grant
#[derive(Clone)]
pub struct GoogleIdentityProvider {
    http: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleIdentityProvider {
    /// Provider with redirects disabled and the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: GoogleConfig) -> AuthResult<Self> {
        Ok(Self {
            http: http_client(DEFAULT_TIMEOUT)?,
            config,
        })
    }
}

impl fmt::Debug for GoogleIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleIdentityProvider")
            .field("client_id", &self.config.client_id)
            .field("token_url", &self.config.token_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> AuthResult<String> {
        let mut form = vec![
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(self.config.token_url.as_str())
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let err = OAuthErrorBody::parse(&body);
            warn!(status = status.as_u16(), error = ?err.error, "Authorization code exchange rejected");
            return Err(AuthError::IdentityExchangeFailed {
                status: status.as_u16(),
                error: err.error.unwrap_or_else(|| "token_exchange_failed".to_string()),
                message: err
                    .error_description
                    .unwrap_or_else(|| "identity provider rejected the code".to_string()),
            });
        }

        let parsed: CodeExchangeResponse = serde_json::from_slice(&body)?;
        parsed.id_token.ok_or_else(|| AuthError::IdentityExchangeFailed {
            status: status.as_u16(),
            error: "missing_id_token".to_string(),
            message: "identity provider response has no id_token".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn assertion(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn test_exchange_assertion_extracts_profile() {
        let token = assertion(json!({
            "iss": "https://accounts.google.com",
            "aud": "client",
            "sub": "1098",
            "name": "Ada Lovelace",
            "email": "ada@x.com",
            "picture": "https://img/ada",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "email_verified": true,
        }));

        let identity = IdentityBridge::new().exchange_assertion(&token).unwrap();
        assert_eq!(identity.subject, "1098");
        assert_eq!(identity.profile.given_name.as_deref(), Some("Ada"));
        assert_eq!(identity.profile.family_name.as_deref(), Some("Lovelace"));
        assert_eq!(identity.profile.email_verified, Some(true));
    }

    #[test]
    fn test_missing_subject_is_incomplete() {
        let token = assertion(json!({"email": "ada@x.com"}));
        assert!(matches!(
            IdentityBridge::new().exchange_assertion(&token),
            Err(AuthError::IncompleteIdentity(_))
        ));

        let empty = assertion(json!({"sub": ""}));
        assert!(matches!(
            IdentityBridge::new().exchange_assertion(&empty),
            Err(AuthError::IncompleteIdentity(_))
        ));
    }

    #[test]
    fn test_garbage_assertion_is_malformed() {
        assert!(matches!(
            IdentityBridge::new().exchange_assertion("nope"),
            Err(AuthError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_google_code_exchange_sends_pkce_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=v3r1f13r"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29",
                "id_token": "header.payload.sig",
                "expires_in": 3599,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = GoogleConfig::new("cid", "secret", "app://callback")
            .with_token_url(format!("{}/token", server.uri()));
        let provider = GoogleIdentityProvider::new(config).unwrap();

        let id_token = provider.exchange_code("c0de", Some("v3r1f13r")).await.unwrap();
        assert_eq!(id_token, "header.payload.sig");
    }

    #[tokio::test]
    async fn test_google_rejection_carries_oauth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Bad Request",
            })))
            .mount(&server)
            .await;

        let config = GoogleConfig::new("cid", "secret", "app://callback")
            .with_token_url(format!("{}/token", server.uri()));
        let provider = GoogleIdentityProvider::new(config).unwrap();

        match provider.exchange_code("stale", None).await {
            Err(AuthError::IdentityExchangeFailed { status, error, message }) => {
                assert_eq!(status, 400);
                assert_eq!(error, "invalid_grant");
                assert_eq!(message, "Bad Request");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_google_response_without_id_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "ya29"})))
            .mount(&server)
            .await;

        let config = GoogleConfig::new("cid", "secret", "app://callback")
            .with_token_url(format!("{}/token", server.uri()));
        let provider = GoogleIdentityProvider::new(config).unwrap();

        assert!(matches!(
            provider.exchange_code("c0de", None).await,
            Err(AuthError::IdentityExchangeFailed { error, .. }) if error == "missing_id_token"
        ));
    }
}
