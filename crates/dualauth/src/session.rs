//! Session Token Manager
//!
//! Issues, verifies and rotates the internal session pair.
//!
//! ## Refresh token lifecycle
//!
//! ```text
//! issued ──verify ok──▶ rotated out (a new pair with a new jti is issued)
//!   │
//!   ├── now > exp ──────▶ expired            (terminal)
//!   └── bad signature ──▶ invalid-signature  (terminal)
//! ```
//!
//! Rotated-out refresh tokens are not recorded, so one presented again
//! before its `exp` still verifies.

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::TokenPolicy;
use crate::error::{AuthError, AuthResult};
use crate::jwt::{Claims, TokenCodec, TokenKind, UserProfile};
use crate::types::{SessionPair, UserIdentity};

/// Verifies and rotates session tokens on behalf of the orchestrator
///
/// Implemented in-process by [`SessionTokenManager`] and remotely by
/// [`BridgeClient`](crate::client::BridgeClient).
#[async_trait]
pub trait SessionAuthority: Send + Sync + fmt::Debug {
    /// Check an access token and return the identity it carries
    fn verify_access(&self, access_token: &str) -> AuthResult<UserIdentity>;

    /// Redeem a refresh token for a rotated pair
    async fn refresh(&self, refresh_token: &str) -> AuthResult<SessionPair>;
}

/// Issues and rotates session pairs with a shared-secret codec
#[derive(Debug, Clone)]
pub struct SessionTokenManager {
    codec: TokenCodec,
    policy: TokenPolicy,
}

impl SessionTokenManager {
    /// Manager over a codec and lifetime policy.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the policy is invalid.
    pub fn new(codec: TokenCodec, policy: TokenPolicy) -> AuthResult<Self> {
        policy.validate()?;
        Ok(Self { codec, policy })
    }

    /// Codec used for signing and verification
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Lifetime policy
    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Issue the first pair for a freshly authenticated user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Malformed` if signing fails.
    pub fn issue_initial_pair(&self, identity: &UserIdentity) -> AuthResult<SessionPair> {
        let pair = self.mint_pair(&identity.subject, identity.profile.clone())?;
        info!(subject = %identity.subject, "Issued session token pair");
        Ok(pair)
    }

    /// Verify a refresh token and rotate it.
    ///
    /// The new refresh token carries a new `jti`. Missing display fields in
    /// the embedded profile are backfilled with placeholders.
    ///
    /// # Errors
    ///
    /// - `AuthError::Expired` / `AuthError::InvalidSignature` / `AuthError::Malformed`
    ///   from verification
    /// - `AuthError::WrongTokenKind` if an access token is presented
    /// - `AuthError::MissingSubject` if the subject is empty
    pub fn refresh(&self, refresh_token: &str) -> AuthResult<SessionPair> {
        let claims = self.codec.verify(refresh_token)?;
        expect_kind(&claims, TokenKind::Refresh)?;
        if claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }

        let profile = if claims.profile.is_complete() {
            claims.profile
        } else {
            warn!(subject = %claims.sub, "Refresh token profile incomplete, using placeholders");
            claims.profile.with_placeholders(&claims.sub)
        };

        let pair = self.mint_pair(&claims.sub, profile)?;
        debug!(subject = %claims.sub, rotated_jti = ?claims.jti, "Session refresh token rotated");
        Ok(pair)
    }

    /// Verify an access token and return its identity.
    ///
    /// # Errors
    ///
    /// Verification errors, or `AuthError::WrongTokenKind` for a refresh token.
    pub fn verify_access(&self, access_token: &str) -> AuthResult<UserIdentity> {
        let claims = self.codec.verify(access_token)?;
        expect_kind(&claims, TokenKind::Access)?;
        Ok(UserIdentity::from(claims))
    }

    /// Issue a new access token from a still-valid one, without a refresh token.
    ///
    /// Used when a client lost its refresh token but holds a live access token.
    ///
    /// # Errors
    ///
    /// Same as [`verify_access`](Self::verify_access).
    pub fn reissue_access(&self, access_token: &str) -> AuthResult<String> {
        let identity = self.verify_access(access_token)?;
        warn!(subject = %identity.subject, "Reissuing access token without a refresh token");
        self.codec.issue(
            Claims::access(identity.subject, identity.profile),
            self.policy.access_lifetime(),
        )
    }

    fn mint_pair(&self, subject: &str, profile: UserProfile) -> AuthResult<SessionPair> {
        let access_token = self.codec.issue(
            Claims::access(subject, profile.clone()),
            self.policy.access_lifetime(),
        )?;
        let refresh_token = self
            .codec
            .issue(Claims::refresh(subject, profile), self.policy.refresh_lifetime())?;
        Ok(SessionPair {
            access_token,
            refresh_token,
        })
    }
}

fn expect_kind(claims: &Claims, expected: TokenKind) -> AuthResult<()> {
    if claims.kind == expected {
        Ok(())
    } else {
        debug!(subject = %claims.sub, expected = %expected, found = %claims.kind, "Wrong token kind");
        Err(AuthError::WrongTokenKind {
            expected,
            found: claims.kind,
        })
    }
}

#[async_trait]
impl SessionAuthority for SessionTokenManager {
    fn verify_access(&self, access_token: &str) -> AuthResult<UserIdentity> {
        SessionTokenManager::verify_access(self, access_token)
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<SessionPair> {
        SessionTokenManager::refresh(self, refresh_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jwt::SigningKey;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn manager(clock: Arc<ManualClock>, access_secs: u64) -> SessionTokenManager {
        let key = SigningKey::new("test-secret-key-at-least-32-bytes-long!").unwrap();
        let codec = TokenCodec::new(&key).with_clock(clock);
        let policy = TokenPolicy::default().with_access_lifetime(Duration::from_secs(access_secs));
        SessionTokenManager::new(codec, policy).unwrap()
    }

    fn ada() -> UserIdentity {
        UserIdentity::new("u1").with_profile(UserProfile {
            name: Some("A".into()),
            email: Some("a@x.com".into()),
            picture: Some("p".into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_initial_pair_kinds_and_lifetimes() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock, 20);
        let pair = manager.issue_initial_pair(&ada()).unwrap();

        let access = manager.codec().verify(&pair.access_token).unwrap();
        let refresh = manager.codec().verify(&pair.refresh_token).unwrap();

        assert_eq!(access.kind, TokenKind::Access);
        assert_eq!(access.jti, None);
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert!(refresh.jti.is_some());
        assert!(access.exp < refresh.exp);
        assert_eq!(access.profile, ada().profile);
        assert_eq!(refresh.profile, ada().profile);
    }

    #[test]
    fn test_refresh_rotates_token_id() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock, 20);
        let initial = manager.issue_initial_pair(&ada()).unwrap();

        let rotated = manager.refresh(&initial.refresh_token).unwrap();

        let old = manager.codec().verify(&initial.refresh_token).unwrap();
        let new = manager.codec().verify(&rotated.refresh_token).unwrap();
        let access = manager.codec().verify(&rotated.access_token).unwrap();
        assert_ne!(old.jti, new.jti);
        assert_eq!(new.kind, TokenKind::Refresh);
        assert_eq!(access.kind, TokenKind::Access);
        assert_eq!(access.sub, "u1");
    }

    #[test]
    fn test_expired_refresh_token_yields_no_pair() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock.clone(), 20);
        let pair = manager.issue_initial_pair(&ada()).unwrap();

        clock.advance(manager.policy().refresh_lifetime() + Duration::from_secs(1));
        assert!(matches!(manager.refresh(&pair.refresh_token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_access_token_rejected_as_refresh() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock, 20);
        let pair = manager.issue_initial_pair(&ada()).unwrap();

        match manager.refresh(&pair.access_token) {
            Err(AuthError::WrongTokenKind { expected, found }) => {
                assert_eq!(expected, TokenKind::Refresh);
                assert_eq!(found, TokenKind::Access);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock, 20);
        let pair = manager.issue_initial_pair(&ada()).unwrap();

        assert!(matches!(
            manager.verify_access(&pair.refresh_token),
            Err(AuthError::WrongTokenKind { .. })
        ));
    }

    #[test]
    fn test_refresh_token_without_subject() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock, 20);
        let token = manager
            .codec()
            .issue(Claims::refresh("", UserProfile::default()), Duration::from_secs(60))
            .unwrap();

        assert!(matches!(manager.refresh(&token), Err(AuthError::MissingSubject)));
    }

    #[test]
    fn test_refresh_backfills_missing_profile() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock, 20);
        let pair = manager
            .issue_initial_pair(&UserIdentity::new("1098765432"))
            .unwrap();

        let rotated = manager.refresh(&pair.refresh_token).unwrap();
        let identity = manager.verify_access(&rotated.access_token).unwrap();
        assert_eq!(identity.profile.name.as_deref(), Some("User 109876"));
        assert_eq!(identity.profile.email.as_deref(), Some("user-109876@example.com"));
        assert!(identity.profile.picture.is_some());
    }

    #[test]
    fn test_refresh_with_foreign_key_is_invalid_signature() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock.clone(), 20);
        let other_key = SigningKey::new("a-completely-different-signing-secret").unwrap();
        let other = SessionTokenManager::new(
            TokenCodec::new(&other_key).with_clock(clock),
            TokenPolicy::default(),
        )
        .unwrap();

        let forged = other.issue_initial_pair(&ada()).unwrap();
        assert!(matches!(
            manager.refresh(&forged.refresh_token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_reissue_access_keeps_identity() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock.clone(), 20);
        let pair = manager.issue_initial_pair(&ada()).unwrap();

        clock.advance(Duration::from_secs(10));
        let reissued = manager.reissue_access(&pair.access_token).unwrap();
        let claims = manager.codec().verify(&reissued).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.exp, T0 + 10 + 20);

        clock.advance(Duration::from_secs(60));
        assert!(matches!(manager.reissue_access(&pair.access_token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_simulated_expiry_then_refresh() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let manager = manager(clock.clone(), 2);
        let pair = manager.issue_initial_pair(&ada()).unwrap();

        clock.advance(Duration::from_secs(3));
        assert!(matches!(manager.verify_access(&pair.access_token), Err(AuthError::Expired)));

        let rotated = manager.refresh(&pair.refresh_token).unwrap();
        let identity = manager.verify_access(&rotated.access_token).unwrap();
        assert_eq!(identity, ada());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let key = SigningKey::new("test-secret-key-at-least-32-bytes-long!").unwrap();
        let policy = TokenPolicy::default()
            .with_access_lifetime(Duration::from_secs(100))
            .with_refresh_lifetime(Duration::from_secs(100));
        assert!(SessionTokenManager::new(TokenCodec::new(&key), policy).is_err());
    }
}
