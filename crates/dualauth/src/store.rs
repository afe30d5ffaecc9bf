//! Persisted session state
//!
//! The orchestrator persists both pairs through [`KeyValueStore`], an
//! async string store (secure storage on a device, or [`MemoryStore`]).
//! [`PersistedTokens`] maps the pairs onto the fixed key layout.

use std::fmt;

use async_trait::async_trait;
use chrono::DateTime;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::AuthResult;
use crate::types::{BackendGrant, SessionPair};

/// Storage keys
pub mod keys {
    /// Session access token
    pub const ACCESS_TOKEN: &str = "accessToken";
    /// Session refresh token
    pub const REFRESH_TOKEN: &str = "refreshToken";
    /// Backend access token
    pub const BACKEND_ACCESS_TOKEN: &str = "backendAccessToken";
    /// Backend refresh token
    pub const BACKEND_REFRESH_TOKEN: &str = "backendRefreshToken";
    /// Backend expiry, decimal seconds since epoch
    pub const BACKEND_EXPIRES_AT: &str = "backendExpiresAt";

    /// Every key the orchestrator writes
    pub const ALL: [&str; 5] = [
        ACCESS_TOKEN,
        REFRESH_TOKEN,
        BACKEND_ACCESS_TOKEN,
        BACKEND_REFRESH_TOKEN,
        BACKEND_EXPIRES_AT,
    ];
}

/// Async string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Read a value
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;

    /// Write a value
    async fn set(&self, key: &str, value: &str) -> AuthResult<()>;

    /// Remove a value; removing a missing key is not an error
    async fn delete(&self, key: &str) -> AuthResult<()>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Snapshot of everything the orchestrator persists
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PersistedTokens {
    /// Session access token
    pub access_token: Option<String>,
    /// Session refresh token
    pub refresh_token: Option<String>,
    /// Backend access token
    pub backend_access_token: Option<String>,
    /// Backend refresh token
    pub backend_refresh_token: Option<String>,
    /// Backend expiry in seconds since epoch; `None` if absent or unparseable
    pub backend_expires_at: Option<i64>,
}

impl fmt::Debug for PersistedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedTokens")
            .field("access_token", &self.access_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .field("backend_access_token", &self.backend_access_token.is_some())
            .field("backend_refresh_token", &self.backend_refresh_token.is_some())
            .field("backend_expires_at", &self.backend_expires_at)
            .finish()
    }
}

impl PersistedTokens {
    /// Read every key.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn load(store: &dyn KeyValueStore) -> AuthResult<Self> {
        let raw_expiry = store.get(keys::BACKEND_EXPIRES_AT).await?;
        let backend_expires_at = raw_expiry.as_deref().and_then(|raw| match raw.trim().parse::<i64>() {
            Ok(seconds) => Some(seconds),
            Err(_) => {
                warn!("Persisted backend expiry is not a number, treating as unknown");
                None
            }
        });

        let tokens = Self {
            access_token: store.get(keys::ACCESS_TOKEN).await?,
            refresh_token: store.get(keys::REFRESH_TOKEN).await?,
            backend_access_token: store.get(keys::BACKEND_ACCESS_TOKEN).await?,
            backend_refresh_token: store.get(keys::BACKEND_REFRESH_TOKEN).await?,
            backend_expires_at,
        };
        debug!(tokens = ?tokens, "Loaded persisted tokens");
        Ok(tokens)
    }

    /// Whether any session token is stored
    pub fn has_session(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }

    /// Backend expiry as an instant
    pub fn backend_expiry(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.backend_expires_at
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
    }

    /// Write the session pair.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn save_session(store: &dyn KeyValueStore, pair: &SessionPair) -> AuthResult<()> {
        store.set(keys::ACCESS_TOKEN, &pair.access_token).await?;
        store.set(keys::REFRESH_TOKEN, &pair.refresh_token).await
    }

    /// Write the backend pair and its expiry.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn save_backend(store: &dyn KeyValueStore, grant: &BackendGrant) -> AuthResult<()> {
        store
            .set(keys::BACKEND_ACCESS_TOKEN, &grant.pair.access_token)
            .await?;
        store
            .set(keys::BACKEND_REFRESH_TOKEN, &grant.pair.refresh_token)
            .await?;
        store
            .set(keys::BACKEND_EXPIRES_AT, &grant.expires_at.timestamp().to_string())
            .await
    }

    /// Delete every key, attempting all of them even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first store failure after all deletes were attempted.
    pub async fn clear(store: &dyn KeyValueStore) -> AuthResult<()> {
        let mut first_error = None;
        for key in keys::ALL {
            if let Err(err) = store.delete(key).await {
                warn!(key, error = %err, "Failed to delete persisted token");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendPair;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryStore::new();
        let pair = SessionPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let grant = BackendGrant {
            pair: BackendPair {
                access_token: "ba".into(),
                refresh_token: "br".into(),
                expires_in_seconds: 60,
            },
            expires_at: DateTime::from_timestamp(1_700_000_060, 0).unwrap(),
        };

        PersistedTokens::save_session(&store, &pair).await.unwrap();
        PersistedTokens::save_backend(&store, &grant).await.unwrap();

        assert_eq!(
            store.get(keys::BACKEND_EXPIRES_AT).await.unwrap().as_deref(),
            Some("1700000060")
        );

        let loaded = PersistedTokens::load(&store).await.unwrap();
        assert_eq!(
            loaded,
            PersistedTokens {
                access_token: Some("a".into()),
                refresh_token: Some("r".into()),
                backend_access_token: Some("ba".into()),
                backend_refresh_token: Some("br".into()),
                backend_expires_at: Some(1_700_000_060),
            }
        );
        assert_eq!(loaded.backend_expiry(), Some(grant.expires_at));
    }

    #[tokio::test]
    async fn test_unparseable_expiry_is_unknown() {
        let store = MemoryStore::new();
        store.set(keys::BACKEND_EXPIRES_AT, "soon").await.unwrap();

        let loaded = PersistedTokens::load(&store).await.unwrap();
        assert_eq!(loaded.backend_expires_at, None);
        assert!(!loaded.has_session());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = MemoryStore::new();
        store.set(keys::ACCESS_TOKEN, "a").await.unwrap();
        store.set("unrelated", "kept").await.unwrap();

        PersistedTokens::clear(&store).await.unwrap();
        PersistedTokens::clear(&store).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("unrelated").await.unwrap().as_deref(), Some("kept"));
    }
}
