//! Refresh Coordinator
//!
//! At most one refresh per [`TokenFamily`] runs at a time in a process. A
//! caller that finds a refresh in flight gets [`Exclusive::AlreadyInProgress`]
//! immediately and can [`RefreshCoordinator::wait_idle`] for the running one
//! to finish instead of starting its own.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::debug;

use crate::types::TokenFamily;

/// Outcome of [`RefreshCoordinator::run_exclusive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusive<T> {
    /// This caller ran the operation
    Completed(T),
    /// Another refresh for the family was already running; nothing was run
    AlreadyInProgress,
}

impl<T> Exclusive<T> {
    /// The operation's result, if this caller ran it
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::AlreadyInProgress => None,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    busy: AtomicBool,
    idle: Notify,
}

/// Clears the busy flag when the guarded operation ends, including on panic
/// or cancellation.
struct BusyGuard<'a> {
    slot: &'a Slot,
    family: TokenFamily,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
        self.slot.idle.notify_waiters();
        debug!(family = %self.family, "Refresh slot released");
    }
}

/// Per-family single-flight guard
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    session: Slot,
    backend: Slot,
}

impl RefreshCoordinator {
    /// Coordinator with both families idle
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, family: TokenFamily) -> &Slot {
        match family {
            TokenFamily::Session => &self.session,
            TokenFamily::Backend => &self.backend,
        }
    }

    /// Whether a refresh for `family` is running
    pub fn is_busy(&self, family: TokenFamily) -> bool {
        self.slot(family).busy.load(Ordering::Acquire)
    }

    /// Run `operation` unless a refresh for `family` is already running.
    ///
    /// The busy flag is cleared when the operation finishes, whatever its
    /// outcome.
    pub async fn run_exclusive<F, Fut, T>(&self, family: TokenFamily, operation: F) -> Exclusive<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.slot(family);
        if slot
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(family = %family, "Refresh already in progress");
            return Exclusive::AlreadyInProgress;
        }

        let _guard = BusyGuard { slot, family };
        debug!(family = %family, "Refresh slot acquired");
        Exclusive::Completed(operation().await)
    }

    /// Wait until no refresh for `family` is running
    pub async fn wait_idle(&self, family: TokenFamily) {
        let slot = self.slot(family);
        loop {
            let notified = slot.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not missed.
            notified.as_mut().enable();
            if !slot.busy.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}
