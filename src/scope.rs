//! Cancellation scopes for background tasks.
//!
//! Every long-lived activity in this crate (stderr draining, exit awaiting,
//! teardown finalization, per-session construction) runs as a task parented
//! to a [`Scope`]. Cancelling a scope is the sole termination signal for its
//! tasks; there is no polled shutdown flag.
//!
//! A plain [`tokio_util::sync::CancellationToken`] carries no payload, so a
//! scope pairs the token with a one-shot failure cause. The first canceller
//! that supplies a cause wins; awaiters read the cause after the token fires
//! and surface it instead of a generic "cancelled" error.

use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;

use crate::errors::SessionError;

/// A cancellation scope: token + task tracker + one-shot failure cause.
///
/// Cloning shares the same scope. [`Scope::child`] derives a scope that is
/// cancelled whenever the parent is, and shares the parent's cause slot so
/// failures recorded anywhere in the tree are visible to every awaiter.
#[derive(Debug, Clone)]
pub struct Scope {
    token: CancellationToken,
    tracker: TaskTracker,
    cause: Arc<OnceLock<SessionError>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// Create a root scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// Derive a child scope: cancelled with the parent, own task tracker,
    /// shared cause slot.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            tracker: TaskTracker::new(),
            cause: Arc::clone(&self.cause),
        }
    }

    /// Spawn a task parented to this scope.
    ///
    /// The task itself must observe [`Scope::cancelled`]; parenting only
    /// tracks completion, it does not abort.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Cancel the scope, recording `cause` if none was recorded yet.
    pub fn cancel_with(&self, cause: SessionError) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    /// Cancel the scope without recording a cause.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the scope is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Whether the scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The recorded failure cause, if any.
    #[must_use]
    pub fn failure(&self) -> Option<SessionError> {
        self.cause.get().cloned()
    }

    /// The recorded failure cause, defaulting to "closed by application"
    /// for scopes cancelled without one.
    #[must_use]
    pub fn failure_or_closed(&self) -> SessionError {
        self.failure().unwrap_or(SessionError::ClosedByApplication)
    }

    /// Wait for all tasks spawned on this scope to finish.
    ///
    /// Closes the tracker first so the wait cannot miss late spawns.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// The underlying cancellation token, for `select!` arms.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
