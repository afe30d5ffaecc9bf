//! Backend Token Manager
//!
//! Wraps a [`BackendTokenBridge`] with expiry tracking and a one-shot
//! proactive refresh timer.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::BackendTokenBridge;
use crate::clock::{Clock, SystemClock};
use crate::error::AuthResult;
use crate::types::{BackendGrant, BackendPair};

/// Default lead time for proactive backend refresh
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60);

/// Handle to a pending proactive refresh
///
/// Dropping the handle cancels the timer. Once the timer has fired, the
/// refresh runs to completion regardless of the handle.
#[derive(Debug)]
pub struct ScheduledRefresh {
    cancel: CancellationToken,
    delay: Duration,
}

impl ScheduledRefresh {
    /// Cancel the timer if it has not fired yet
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the timer was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Delay the timer was armed with
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Drop for ScheduledRefresh {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Issues and refreshes the backend pair and tracks its expiry
#[derive(Clone)]
pub struct BackendTokenManager {
    bridge: Arc<dyn BackendTokenBridge>,
    clock: Arc<dyn Clock>,
    buffer: Duration,
}

impl fmt::Debug for BackendTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendTokenManager")
            .field("bridge", &self.bridge)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl BackendTokenManager {
    /// Manager over a bridge, using the wall clock and a 60s buffer
    pub fn new(bridge: Arc<dyn BackendTokenBridge>) -> Self {
        Self {
            bridge,
            clock: Arc::new(SystemClock),
            buffer: DEFAULT_REFRESH_BUFFER,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set how long before expiry the proactive refresh fires
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Proactive refresh lead time
    pub fn refresh_buffer(&self) -> Duration {
        self.buffer
    }

    /// Exchange an identity assertion for the first backend pair.
    ///
    /// # Errors
    ///
    /// Propagates the bridge failure unchanged.
    pub async fn obtain_initial(&self, identity_assertion: &str) -> AuthResult<BackendGrant> {
        let pair = self.bridge.convert(identity_assertion).await?;
        let grant = self.grant_from(pair);
        info!(expires_at = %grant.expires_at, "Obtained backend token pair");
        Ok(grant)
    }

    /// Redeem the backend refresh token.
    ///
    /// # Errors
    ///
    /// Propagates the bridge failure; callers use
    /// [`AuthError::class`](crate::AuthError::class) to tell auth rejection
    /// from transient failure.
    pub async fn refresh(&self, backend_refresh_token: &str) -> AuthResult<BackendGrant> {
        match self.bridge.refresh(backend_refresh_token).await {
            Ok(pair) => {
                let grant = self.grant_from(pair);
                debug!(expires_at = %grant.expires_at, "Backend token pair refreshed");
                Ok(grant)
            }
            Err(err) => {
                warn!(error = %err, class = %err.class(), "Backend token refresh failed");
                Err(err)
            }
        }
    }

    /// Attach `expires_at = now + expires_in` to a pair
    pub fn grant_from(&self, pair: BackendPair) -> BackendGrant {
        let lifetime = TimeDelta::try_seconds(i64::try_from(pair.expires_in_seconds).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC);
        BackendGrant { pair, expires_at }
    }

    /// Rebuild a grant from a persisted pair and its tracked expiry
    pub fn restore_grant(&self, access_token: &str, refresh_token: &str, expires_at: DateTime<Utc>) -> BackendGrant {
        let remaining = (expires_at - self.clock.now()).num_seconds().max(0);
        BackendGrant {
            pair: BackendPair {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
                expires_in_seconds: u64::try_from(remaining).unwrap_or(0),
            },
            expires_at,
        }
    }

    /// Time until the proactive refresh should fire: `max(expires_at - now - buffer, 0)`
    pub fn refresh_delay(&self, expires_at: DateTime<Utc>) -> Duration {
        let buffer = TimeDelta::from_std(self.buffer).unwrap_or(TimeDelta::MAX);
        (expires_at - self.clock.now())
            .checked_sub(&buffer)
            .and_then(|remaining| remaining.to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Whether a pair expiring at `expires_at` is inside the refresh buffer
    pub fn needs_refresh(&self, expires_at: DateTime<Utc>) -> bool {
        self.refresh_delay(expires_at).is_zero()
    }

    /// Arm a one-shot timer that runs `refresh_fn` at
    /// `max(expires_at - now - buffer, 0)`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_proactive_refresh<F, Fut>(
        &self,
        expires_at: DateTime<Utc>,
        refresh_fn: F,
    ) -> ScheduledRefresh
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.refresh_delay(expires_at);
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();

        debug!(delay_secs = delay.as_secs(), "Scheduling proactive backend refresh");
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {
                    debug!("Proactive backend refresh cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    debug!("Proactive backend refresh firing");
                    refresh_fn().await;
                }
            }
        });

        ScheduledRefresh { cancel, delay }
    }
}
