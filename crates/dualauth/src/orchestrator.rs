//! Client Session Orchestrator
//!
//! Holds the client-side [`Session`], restores it from storage on start,
//! wraps outbound calls with a single refresh-and-retry on 401, and tears
//! everything down on sign-out.
//!
//! ## Refresh ordering
//!
//! Within one refresh of a family:
//!
//! ```text
//! verify ──▶ rotate ──▶ liveness check ──▶ persist ──▶ install in memory
//! ```
//!
//! Refreshes run through the [`RefreshCoordinator`], so each family has at
//! most one in flight. [`restore`](SessionOrchestrator::restore) follows the
//! same order per pair and installs the session once both pairs are ready. A refresh that completes after the session it
//! belonged to ended (sign-out or a new sign-in) is discarded.
//!
//! ## Failure handling
//!
//! Terminal failures end the session and surface as
//! [`AuthError::SessionEnded`]. Transient failures are returned unchanged
//! and the session is kept.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{BackendTokenManager, ScheduledRefresh};
use crate::coordinator::{Exclusive, RefreshCoordinator};
use crate::error::{AuthError, AuthResult};
use crate::events::{SessionEvent, SessionObserver, TracingObserver};
use crate::session::SessionAuthority;
use crate::store::{KeyValueStore, PersistedTokens};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
use crate::types::{BackendGrant, Session, SessionPair, TokenFamily, UserIdentity};
use crate::wire::TokenExchangeResponse;

/// Result of [`SessionOrchestrator::restore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A persisted session was adopted (possibly after refreshing)
    Restored(Session),
    /// Nothing was persisted
    NoSession,
    /// The persisted session can never be used again; storage was cleared
    Terminal(String),
    /// Restoring failed for a reason that may clear up; storage was kept
    Transient(String),
}

impl RestoreOutcome {
    /// The restored session, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Restored(session) => Some(session),
            _ => None,
        }
    }
}

enum Rotation {
    Session(UserIdentity, SessionPair),
    Backend(BackendGrant),
}

/// How restoring one pair ended, short of an error
enum Restoring<T> {
    Ready(T),
    /// A sign-in or sign-out replaced the state being restored
    Superseded,
}

/// Builder for [`SessionOrchestrator`]
pub struct OrchestratorBuilder {
    authority: Arc<dyn SessionAuthority>,
    backend: BackendTokenManager,
    store: Arc<dyn KeyValueStore>,
    transport: Option<Arc<dyn HttpTransport>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl OrchestratorBuilder {
    /// Send API calls through this transport instead of a default reqwest client
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Deliver lifecycle events to this observer instead of [`TracingObserver`]
    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if no transport was given and the
    /// default HTTP client cannot be built.
    pub fn build(self) -> AuthResult<Arc<SessionOrchestrator>> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let observer = self.observer.unwrap_or_else(|| Arc::new(TracingObserver));

        Ok(Arc::new_cyclic(|this| SessionOrchestrator {
            this: this.clone(),
            authority: self.authority,
            backend: self.backend,
            coordinator: RefreshCoordinator::new(),
            store: self.store,
            transport,
            observer,
            state: RwLock::new(None),
            epoch: AtomicU64::new(0),
            commit: tokio::sync::Mutex::new(()),
            backend_timer: Mutex::new(None),
        }))
    }
}

/// Client-side session state holder
pub struct SessionOrchestrator {
    this: Weak<SessionOrchestrator>,
    authority: Arc<dyn SessionAuthority>,
    backend: BackendTokenManager,
    coordinator: RefreshCoordinator,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn HttpTransport>,
    observer: Arc<dyn SessionObserver>,
    state: RwLock<Option<Session>>,
    /// Bumped on every sign-in and sign-out
    epoch: AtomicU64,
    /// Serializes persist-and-install against sign-in and sign-out
    commit: tokio::sync::Mutex<()>,
    backend_timer: Mutex<Option<ScheduledRefresh>>,
}

impl fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("authority", &self.authority)
            .field("backend", &self.backend)
            .field("signed_in", &self.state.read().is_some())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SessionOrchestrator {
    /// Start building an orchestrator
    pub fn builder(
        authority: Arc<dyn SessionAuthority>,
        backend: BackendTokenManager,
        store: Arc<dyn KeyValueStore>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            authority,
            backend,
            store,
            transport: None,
            observer: None,
        }
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<Session> {
        self.state.read().clone()
    }

    /// Identity of the signed-in user
    pub fn current_user(&self) -> Option<UserIdentity> {
        self.state.read().as_ref().map(|session| session.user.clone())
    }

    /// Whether a refresh for `family` is running
    pub fn is_refreshing(&self, family: TokenFamily) -> bool {
        self.coordinator.is_busy(family)
    }

    /// Current access token for `family`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotAuthenticated` if there is no session, or no
    /// backend pair when `family` is [`TokenFamily::Backend`].
    pub fn access_token(&self, family: TokenFamily) -> AuthResult<String> {
        self.state
            .read()
            .as_ref()
            .and_then(|session| session.access_token(family))
            .map(str::to_owned)
            .ok_or(AuthError::NotAuthenticated)
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Adopt the persisted session, refreshing whichever pair needs it.
    ///
    /// A terminal refresh failure clears storage. A transient one leaves
    /// storage alone so the next start can try again. If a refresh of the
    /// same family is already running, the restore waits for it and reads
    /// storage again. A sign-in or sign-out that lands while restoring wins.
    pub async fn restore(&self) -> RestoreOutcome {
        let epoch = self.current_epoch();
        let mut persisted = match PersistedTokens::load(self.store.as_ref()).await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(error = %err, "Failed to read persisted session");
                return RestoreOutcome::Transient(err.to_string());
            }
        };

        if !persisted.has_session() {
            debug!("No persisted session");
            return RestoreOutcome::NoSession;
        }

        let (user, tokens) = match self.restore_session_pair(epoch, &mut persisted).await {
            Ok(Restoring::Ready(restored)) => restored,
            Ok(Restoring::Superseded) => return self.superseded(),
            Err(err) => return self.restore_failed(TokenFamily::Session, epoch, err).await,
        };
        let backend = match self.restore_backend_pair(epoch, &mut persisted).await {
            Ok(Restoring::Ready(backend)) => backend,
            Ok(Restoring::Superseded) => return self.superseded(),
            Err(err) => return self.restore_failed(TokenFamily::Backend, epoch, err).await,
        };

        let session = Session {
            user,
            tokens,
            backend,
        };

        let _commit = self.commit.lock().await;
        if self.current_epoch() != epoch {
            return self.superseded();
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        *self.state.write() = Some(session.clone());
        if let Some(grant) = &session.backend {
            self.schedule_backend_refresh(grant.expires_at);
        }

        info!(subject = %session.user.subject, "Session restored");
        self.emit(SessionEvent::Restored {
            subject: session.user.subject.clone(),
        });
        RestoreOutcome::Restored(session)
    }

    async fn restore_session_pair(
        &self,
        epoch: u64,
        persisted: &mut PersistedTokens,
    ) -> AuthResult<Restoring<(UserIdentity, SessionPair)>> {
        loop {
            let Some(refresh_token) = persisted.refresh_token.clone() else {
                return Err(AuthError::Malformed(
                    "persisted session has no refresh token".to_string(),
                ));
            };

            if let Some(access_token) = persisted.access_token.as_deref() {
                match self.authority.verify_access(access_token) {
                    Ok(user) => {
                        debug!(subject = %user.subject, "Persisted access token still valid");
                        return Ok(Restoring::Ready((
                            user,
                            SessionPair {
                                access_token: access_token.to_string(),
                                refresh_token,
                            },
                        )));
                    }
                    Err(err) => debug!(error = %err, "Persisted access token unusable, refreshing"),
                }
            }

            match self
                .rotate_for_restore(TokenFamily::Session, epoch, &refresh_token)
                .await
            {
                Exclusive::Completed(Ok(Some(Rotation::Session(user, pair)))) => {
                    self.emit(SessionEvent::Refreshed {
                        family: TokenFamily::Session,
                    });
                    return Ok(Restoring::Ready((user, pair)));
                }
                Exclusive::Completed(Ok(_)) => {
                    self.emit(SessionEvent::RefreshDiscarded {
                        family: TokenFamily::Session,
                    });
                    return Ok(Restoring::Superseded);
                }
                Exclusive::Completed(Err(err)) => return Err(err),
                Exclusive::AlreadyInProgress => {
                    if !self.join_restore(TokenFamily::Session, epoch, persisted).await? {
                        return Ok(Restoring::Superseded);
                    }
                }
            }
        }
    }

    async fn restore_backend_pair(
        &self,
        epoch: u64,
        persisted: &mut PersistedTokens,
    ) -> AuthResult<Restoring<Option<BackendGrant>>> {
        loop {
            let Some(refresh_token) = persisted.backend_refresh_token.clone() else {
                debug!("No persisted backend pair");
                return Ok(Restoring::Ready(None));
            };

            if let (Some(access_token), Some(expires_at)) =
                (persisted.backend_access_token.as_deref(), persisted.backend_expiry())
                && !self.backend.needs_refresh(expires_at)
            {
                debug!(expires_at = %expires_at, "Persisted backend token still valid");
                return Ok(Restoring::Ready(Some(self.backend.restore_grant(
                    access_token,
                    &refresh_token,
                    expires_at,
                ))));
            }

            match self
                .rotate_for_restore(TokenFamily::Backend, epoch, &refresh_token)
                .await
            {
                Exclusive::Completed(Ok(Some(Rotation::Backend(grant)))) => {
                    self.emit(SessionEvent::Refreshed {
                        family: TokenFamily::Backend,
                    });
                    return Ok(Restoring::Ready(Some(grant)));
                }
                Exclusive::Completed(Ok(_)) => {
                    self.emit(SessionEvent::RefreshDiscarded {
                        family: TokenFamily::Backend,
                    });
                    return Ok(Restoring::Superseded);
                }
                Exclusive::Completed(Err(err)) => return Err(err),
                Exclusive::AlreadyInProgress => {
                    if !self.join_restore(TokenFamily::Backend, epoch, persisted).await? {
                        return Ok(Restoring::Superseded);
                    }
                }
            }
        }
    }

    /// Rotate `family` and persist the result if the session is still live
    async fn rotate_for_restore(
        &self,
        family: TokenFamily,
        epoch: u64,
        refresh_token: &str,
    ) -> Exclusive<AuthResult<Option<Rotation>>> {
        self.coordinator
            .run_exclusive(family, || async {
                self.emit(SessionEvent::RefreshStarted { family });
                let rotation = self.rotate(family, refresh_token).await?;
                let live = self.persist_if_live(epoch, &rotation).await?;
                Ok::<_, AuthError>(live.then_some(rotation))
            })
            .await
    }

    /// Wait for the running refresh of `family`, then re-read storage.
    ///
    /// Returns `false` if the session changed meanwhile or nothing is
    /// persisted any more.
    async fn join_restore(
        &self,
        family: TokenFamily,
        epoch: u64,
        persisted: &mut PersistedTokens,
    ) -> AuthResult<bool> {
        self.emit(SessionEvent::RefreshJoined { family });
        self.coordinator.wait_idle(family).await;
        if self.current_epoch() != epoch {
            return Ok(false);
        }
        *persisted = PersistedTokens::load(self.store.as_ref()).await?;
        Ok(persisted.has_session())
    }

    /// Outcome for a restore overtaken by a sign-in, sign-out or another restore
    fn superseded(&self) -> RestoreOutcome {
        debug!("Session changed while restoring, keeping the newer state");
        match self.session() {
            Some(session) => RestoreOutcome::Restored(session),
            None => RestoreOutcome::NoSession,
        }
    }

    async fn restore_failed(&self, family: TokenFamily, epoch: u64, err: AuthError) -> RestoreOutcome {
        let reason = err.to_string();
        self.emit(SessionEvent::RefreshFailed {
            family,
            class: err.class(),
            reason: reason.clone(),
        });

        if !err.is_terminal() {
            warn!(family = %family, error = %err, "Could not restore session, keeping persisted state");
            return RestoreOutcome::Transient(reason);
        }

        let _commit = self.commit.lock().await;
        if self.current_epoch() != epoch {
            return self.superseded();
        }
        warn!(family = %family, error = %err, "Persisted session rejected, clearing it");
        if let Err(clear_err) = PersistedTokens::clear(self.store.as_ref()).await {
            warn!(error = %clear_err, "Failed to clear persisted session");
        }
        RestoreOutcome::Terminal(reason)
    }

    /// Complete a sign-in with the tokens returned by the identity exchange.
    ///
    /// Replaces any current session.
    ///
    /// # Errors
    ///
    /// - Verification errors if the session access token is not valid
    /// - `AuthError::Storage` if the pairs cannot be persisted
    pub async fn establish(&self, tokens: TokenExchangeResponse) -> AuthResult<Session> {
        let pair = tokens.session_pair();
        let user = self.authority.verify_access(&pair.access_token)?;
        let grant = self.backend.grant_from(tokens.backend_pair());

        let _commit = self.commit.lock().await;
        PersistedTokens::save_session(self.store.as_ref(), &pair).await?;
        PersistedTokens::save_backend(self.store.as_ref(), &grant).await?;

        self.epoch.fetch_add(1, Ordering::AcqRel);
        let expires_at = grant.expires_at;
        let session = Session {
            user,
            tokens: pair,
            backend: Some(grant),
        };
        *self.state.write() = Some(session.clone());
        self.schedule_backend_refresh(expires_at);

        info!(subject = %session.user.subject, "Signed in");
        self.emit(SessionEvent::SignedIn {
            subject: session.user.subject.clone(),
        });
        Ok(session)
    }

    /// Send `request` with the access token of `family` as a bearer credential.
    ///
    /// On a 401 the token is refreshed once and the request retried once;
    /// whatever the retry returns is handed back.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotAuthenticated` without a session (or backend pair)
    /// - `AuthError::SessionEnded` if the refresh failed terminally
    /// - The underlying transport or refresh error otherwise
    pub async fn call(&self, request: ApiRequest, family: TokenFamily) -> AuthResult<ApiResponse> {
        let token = self.access_token(family)?;
        let response = self.transport.send(request.with_bearer(&token)?).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(family = %family, url = %request.url, "Request unauthorized, refreshing");
        // A refresh that finished while this request was in flight already
        // produced a newer token.
        let current = self.access_token(family)?;
        let token = if current == token {
            self.refresh(family).await?
        } else {
            current
        };

        let retried = self.transport.send(request.with_bearer(&token)?).await?;
        self.emit(SessionEvent::RequestRetried {
            family,
            status: retried.status.as_u16(),
        });
        Ok(retried)
    }

    /// Refresh the session pair, or wait for the refresh already running.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn refresh_session(&self) -> AuthResult<String> {
        self.refresh(TokenFamily::Session).await
    }

    /// Refresh the backend pair, or wait for the refresh already running.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn refresh_backend(&self) -> AuthResult<String> {
        self.refresh(TokenFamily::Backend).await
    }

    async fn refresh(&self, family: TokenFamily) -> AuthResult<String> {
        let epoch = self.current_epoch();
        match self
            .coordinator
            .run_exclusive(family, || self.refresh_now(family, epoch))
            .await
        {
            Exclusive::Completed(result) => result,
            Exclusive::AlreadyInProgress => {
                self.emit(SessionEvent::RefreshJoined { family });
                self.coordinator.wait_idle(family).await;
                self.access_token(family)
            }
        }
    }

    async fn refresh_now(&self, family: TokenFamily, epoch: u64) -> AuthResult<String> {
        let refresh_token = self
            .state
            .read()
            .as_ref()
            .and_then(|session| session.refresh_token(family))
            .map(str::to_owned)
            .ok_or(AuthError::NotAuthenticated)?;

        self.emit(SessionEvent::RefreshStarted { family });
        let rotation = self.rotate(family, &refresh_token).await;

        let committed = match rotation {
            Ok(rotation) => self.commit(family, epoch, rotation).await,
            Err(err) => Err(err),
        };

        match committed {
            Ok(Some(token)) => {
                self.emit(SessionEvent::Refreshed { family });
                Ok(token)
            }
            Ok(None) => {
                self.emit(SessionEvent::RefreshDiscarded { family });
                Err(AuthError::NotAuthenticated)
            }
            Err(err) => self.refresh_failed(family, epoch, err).await,
        }
    }

    /// Redeem a refresh token of `family`; session pairs are verified on arrival
    async fn rotate(&self, family: TokenFamily, refresh_token: &str) -> AuthResult<Rotation> {
        match family {
            TokenFamily::Session => {
                let pair = self.authority.refresh(refresh_token).await?;
                let user = self.authority.verify_access(&pair.access_token)?;
                Ok(Rotation::Session(user, pair))
            }
            TokenFamily::Backend => self.backend.refresh(refresh_token).await.map(Rotation::Backend),
        }
    }

    /// Persist a rotation unless the session it belongs to has ended
    async fn persist_if_live(&self, epoch: u64, rotation: &Rotation) -> AuthResult<bool> {
        let _commit = self.commit.lock().await;
        if self.current_epoch() != epoch {
            debug!("Session ended during refresh, not persisting result");
            return Ok(false);
        }
        self.persist(rotation).await?;
        Ok(true)
    }

    /// Caller holds the commit lock
    async fn persist(&self, rotation: &Rotation) -> AuthResult<()> {
        match rotation {
            Rotation::Session(_, pair) => PersistedTokens::save_session(self.store.as_ref(), pair).await,
            Rotation::Backend(grant) => PersistedTokens::save_backend(self.store.as_ref(), grant).await,
        }
    }

    /// Persist and install a rotation; `None` if the session ended meanwhile
    async fn commit(
        &self,
        family: TokenFamily,
        epoch: u64,
        rotation: Rotation,
    ) -> AuthResult<Option<String>> {
        let _commit = self.commit.lock().await;
        if self.current_epoch() != epoch {
            debug!(family = %family, "Session ended during refresh, discarding result");
            return Ok(None);
        }

        self.persist(&rotation).await?;
        match rotation {
            Rotation::Session(user, pair) => {
                let token = pair.access_token.clone();
                if let Some(session) = self.state.write().as_mut() {
                    session.user = user;
                    session.tokens = pair;
                }
                Ok(Some(token))
            }
            Rotation::Backend(grant) => {
                let token = grant.pair.access_token.clone();
                let expires_at = grant.expires_at;
                if let Some(session) = self.state.write().as_mut() {
                    session.backend = Some(grant);
                }
                self.schedule_backend_refresh(expires_at);
                Ok(Some(token))
            }
        }
    }

    async fn refresh_failed(&self, family: TokenFamily, epoch: u64, err: AuthError) -> AuthResult<String> {
        self.emit(SessionEvent::RefreshFailed {
            family,
            class: err.class(),
            reason: err.to_string(),
        });

        if !err.is_terminal() {
            return Err(err);
        }

        let _commit = self.commit.lock().await;
        if self.current_epoch() == epoch {
            warn!(family = %family, error = %err, "Refresh rejected, ending session");
            self.teardown().await;
        }
        Err(AuthError::SessionEnded(err.to_string()))
    }

    /// Clear both pairs from memory and storage and cancel the backend timer.
    ///
    /// Safe to call when already signed out. Refreshes still in flight
    /// complete, and their results are discarded.
    pub async fn sign_out(&self) {
        let _commit = self.commit.lock().await;
        self.teardown().await;
    }

    /// Caller holds the commit lock
    async fn teardown(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let previous = self.state.write().take();
        let timer = self.backend_timer.lock().take();
        if let Some(timer) = timer {
            timer.cancel();
        }

        if let Err(err) = PersistedTokens::clear(self.store.as_ref()).await {
            warn!(error = %err, "Failed to clear persisted session on sign-out");
        }

        if let Some(session) = previous {
            info!(subject = %session.user.subject, "Signed out");
        }
        self.emit(SessionEvent::SignedOut);
    }

    fn schedule_backend_refresh(&self, expires_at: DateTime<Utc>) {
        let this = self.this.clone();
        let handle = self
            .backend
            .schedule_proactive_refresh(expires_at, move || async move {
                let Some(orchestrator) = this.upgrade() else {
                    return;
                };
                if let Err(err) = orchestrator.refresh_backend().await {
                    debug!(error = %err, "Proactive backend refresh did not complete");
                }
            });

        self.emit(SessionEvent::BackendRefreshScheduled {
            in_secs: handle.delay().as_secs(),
        });
        // Dropping the previous handle cancels its timer unless it already fired.
        let previous = self.backend_timer.lock().replace(handle);
        drop(previous);
    }
}
