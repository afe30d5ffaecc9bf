//! Session lifecycle events
//!
//! The orchestrator reports what it does to a [`SessionObserver`] instead of
//! printing. [`TracingObserver`] forwards events to `tracing` under the
//! `dualauth::session` target; tests install a recording observer.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::FailureClass;
use crate::types::TokenFamily;

/// Something the orchestrator did or observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A persisted session was adopted on start
    Restored {
        /// User subject
        subject: String,
    },
    /// A sign-in completed
    SignedIn {
        /// User subject
        subject: String,
    },
    /// The session was cleared
    SignedOut,
    /// A refresh started
    RefreshStarted {
        /// Family being refreshed
        family: TokenFamily,
    },
    /// A refresh finished and its tokens were applied
    Refreshed {
        /// Family refreshed
        family: TokenFamily,
    },
    /// A refresh was already running; this caller waited for it
    RefreshJoined {
        /// Family being refreshed
        family: TokenFamily,
    },
    /// A refresh failed
    RefreshFailed {
        /// Family being refreshed
        family: TokenFamily,
        /// Whether the failure ended the session
        class: FailureClass,
        /// Failure description
        reason: String,
    },
    /// A refresh completed after the session it belonged to ended
    RefreshDiscarded {
        /// Family refreshed
        family: TokenFamily,
    },
    /// The proactive backend refresh was armed
    BackendRefreshScheduled {
        /// Seconds until it fires
        in_secs: u64,
    },
    /// A call was retried after a 401 and a refresh
    RequestRetried {
        /// Family whose token was refreshed
        family: TokenFamily,
        /// Status of the retried request
        status: u16,
    },
}

/// Receives session lifecycle events
pub trait SessionObserver: Send + Sync + fmt::Debug {
    /// Called synchronously from the orchestrator; must not block
    fn on_event(&self, event: &SessionEvent);
}

/// Logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Restored { subject } => {
                info!(target: "dualauth::session", subject = %subject, "Session restored");
            }
            SessionEvent::SignedIn { subject } => {
                info!(target: "dualauth::session", subject = %subject, "Signed in");
            }
            SessionEvent::SignedOut => {
                info!(target: "dualauth::session", "Signed out");
            }
            SessionEvent::RefreshStarted { family } => {
                debug!(target: "dualauth::session", family = %family, "Refresh started");
            }
            SessionEvent::Refreshed { family } => {
                info!(target: "dualauth::session", family = %family, "Tokens refreshed");
            }
            SessionEvent::RefreshJoined { family } => {
                debug!(target: "dualauth::session", family = %family, "Joined in-flight refresh");
            }
            SessionEvent::RefreshFailed {
                family,
                class,
                reason,
            } => {
                warn!(
                    target: "dualauth::session",
                    family = %family,
                    class = %class,
                    reason = %reason,
                    "Refresh failed"
                );
            }
            SessionEvent::RefreshDiscarded { family } => {
                debug!(target: "dualauth::session", family = %family, "Refresh result discarded, session ended");
            }
            SessionEvent::BackendRefreshScheduled { in_secs } => {
                debug!(target: "dualauth::session", in_secs, "Backend refresh scheduled");
            }
            SessionEvent::RequestRetried { family, status } => {
                debug!(target: "dualauth::session", family = %family, status, "Request retried after refresh");
            }
        }
    }
}
