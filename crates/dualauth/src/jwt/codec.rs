//! Issue, verify and inspect signed session tokens
//!
//! [`TokenCodec`] binds a shared HS256 secret and a [`Clock`]. Expiry is
//! checked against the codec's clock rather than inside `jsonwebtoken`, so
//! simulated time applies to verification as well as issuance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::Claims;
use crate::clock::{Clock, SystemClock, whole_seconds};
use crate::error::{AuthError, AuthResult};

/// Secrets shorter than this are accepted with a warning
const RECOMMENDED_SECRET_LEN: usize = 32;

/// Shared HS256 secret
#[derive(Clone)]
pub struct SigningKey {
    secret: SecretString,
}

impl SigningKey {
    /// Wrap a shared secret.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the secret is empty.
    pub fn new(secret: impl Into<String>) -> AuthResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::Configuration(
                "signing secret must not be empty".to_string(),
            ));
        }
        if secret.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                length = secret.len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "Signing secret is shorter than recommended"
            );
        }
        Ok(Self {
            secret: SecretString::new(secret),
        })
    }

    fn bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// HS256 token codec bound to one signing key
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Codec using the wall clock
    pub fn new(key: &SigningKey) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is enforced against our own clock in `verify`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(key.bytes()),
            decoding: DecodingKey::from_secret(key.bytes()),
            validation,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Time source used for stamping and expiry checks
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Stamp `iat = now`, `exp = now + lifetime`, and sign.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Malformed` if the claims cannot be encoded.
    pub fn issue(&self, mut claims: Claims, lifetime: Duration) -> AuthResult<String> {
        let now = self.clock.unix_now();
        claims.iat = now;
        claims.exp = now.saturating_add(whole_seconds(lifetime));

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Malformed(format!("failed to sign token: {e}")))
    }

    /// Check the signature and expiry and return the claims.
    ///
    /// A token is accepted while `now <= exp`.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidSignature` if the signature does not match
    /// - `AuthError::Expired` if `now > exp`
    /// - `AuthError::Malformed` for anything that is not a session token
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "Token verification failed");
            match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Malformed(e.to_string()),
            }
        })?;

        let claims = data.claims;
        let now = self.clock.unix_now();
        if now > claims.exp {
            debug!(subject = %claims.sub, exp = claims.exp, now, "Token expired");
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    /// Parse the payload of a JWT without checking its signature.
    ///
    /// Only for assertions issued by a trusted third party, or for reading
    /// claims of a token whose signature the caller cannot check.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Malformed` if the token is not three segments or
    /// the payload is not base64url JSON matching `T`.
    pub fn decode_unsafe<T: DeserializeOwned>(token: &str) -> AuthResult<T> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(AuthError::Malformed(format!(
                "expected 3 segments, found {}",
                parts.len()
            )));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(parts[1].trim_end_matches('='))
            .map_err(|e| AuthError::Malformed(format!("invalid payload encoding: {e}")))?;

        serde_json::from_slice(&payload)
            .map_err(|e| AuthError::Malformed(format!("invalid claims: {e}")))
    }
}
