//! # dualauth - Dual-Token Authentication Bridge
//!
//! Token lifecycle engine for clients that hold two independent credential
//! pairs at once: an internal **session pair** (short-lived access token plus
//! long-lived refresh token, signed with a shared secret and verified
//! locally) and an opaque **backend pair** issued by a resource server.
//!
//! ## Data Flow
//!
//! ```text
//! IdP assertion ──▶ IdentityBridge ──▶ SessionTokenManager ──▶ session pair ─┐
//!        │                                                                    ├─▶ SessionOrchestrator
//!        └──────▶ BackendTokenBridge ──▶ BackendTokenManager ──▶ backend pair ┘      (persist, call, refresh)
//! ```
//!
//! API calls go through the orchestrator, which attaches the matching access
//! token and on a 401 refreshes that family once (through the
//! [`RefreshCoordinator`]) before retrying once.
//!
//! ## Architecture
//!
//! - [`jwt`] - Signed token codec and claim set
//! - [`identity`] - Identity assertions and the identity provider code exchange
//! - [`backend`] - Resource-server bridge and backend pair manager
//! - [`session`] - Session pair issuance, verification and rotation
//! - [`coordinator`] - Per-family single-flight refresh guard
//! - [`orchestrator`] - Client-side session holder
//! - [`client`] - HTTP client for the bridge server
//! - [`store`] - Persisted state layout
//! - [`transport`] - Outbound API request model
//! - [`events`] - Lifecycle event hook
//! - [`wire`] - Bridge server request and response bodies
//!
//! ## Quick Start
//!
//! ```rust
//! use dualauth::{SessionTokenManager, SigningKey, TokenCodec, TokenPolicy, UserIdentity};
//!
//! let codec = TokenCodec::new(&SigningKey::new("a-shared-secret-of-at-least-32-bytes")?);
//! let sessions = SessionTokenManager::new(codec, TokenPolicy::default())?;
//!
//! let pair = sessions.issue_initial_pair(&UserIdentity::new("1098"))?;
//! assert_eq!(sessions.verify_access(&pair.access_token)?.subject, "1098");
//!
//! let rotated = sessions.refresh(&pair.refresh_token)?;
//! assert_ne!(rotated.refresh_token, pair.refresh_token);
//! # Ok::<(), dualauth::AuthError>(())
//! ```
//!
//! ## Failure Classes
//!
//! Every [`AuthError`] is either terminal (the session must end: expired
//! refresh token, bad signature, wrong token kind, auth-rejecting backend
//! response) or transient (network failure, any other backend status). The
//! orchestrator signs out on terminal failures and surfaces transient ones
//! unchanged.

pub mod backend;
pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod identity;
pub mod jwt;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;
pub mod wire;

#[doc(inline)]
pub use config::{BackendConfig, ClientConfig, GoogleConfig, TokenPolicy};

#[doc(inline)]
pub use error::{AuthError, AuthResult, FailureClass};

#[doc(inline)]
pub use types::{BackendGrant, BackendPair, Session, SessionPair, TokenFamily, UserIdentity};

pub use backend::{BackendTokenBridge, BackendTokenManager, HttpBackendBridge, ScheduledRefresh};
pub use client::BridgeClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Exclusive, RefreshCoordinator};
pub use events::{SessionEvent, SessionObserver, TracingObserver};
pub use identity::{GoogleIdentityProvider, IdentityBridge, IdentityProvider};
pub use jwt::{Claims, SigningKey, TokenCodec, TokenKind, UserProfile};
pub use orchestrator::{OrchestratorBuilder, RestoreOutcome, SessionOrchestrator};
pub use session::{SessionAuthority, SessionTokenManager};
pub use store::{KeyValueStore, MemoryStore, PersistedTokens};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
