//! Per-key registry record and its construction state machine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;

use crate::errors::{Result, SessionError};
use crate::scope::Scope;
use crate::session::{Session, SessionId};

/// Factory closure that can (re)create the session for one registry key.
///
/// The factory receives the entry's [`SessionId`] and the operational
/// [`Scope`] the new session must be built on — the registry cancels that
/// scope on `unregister`, and [`Session::is_usable`] reads it, so a factory
/// that parents its supervisor elsewhere breaks recreation.
pub type SessionFactory =
    Arc<dyn Fn(SessionId, Scope) -> BoxFuture<'static, Result<Session>> + Send + Sync>;

/// Handle to an in-flight construction attempt, shared by all awaiters.
pub(crate) type Attempt = Shared<BoxFuture<'static, Result<Arc<Session>>>>;

/// Construction state of one registry key.
///
/// Transitions happen under the entry lock, held only for the read-modify-
/// write itself — never across an await.
#[derive(Debug)]
pub(crate) enum EntryState {
    /// No session and no attempt in flight.
    Idle,
    /// Exactly one construction attempt is outstanding; concurrent `get`
    /// callers clone and await the same shared future.
    Constructing {
        /// The shared attempt future.
        attempt: Attempt,
        /// Operational scope of the session being constructed; cancelled by
        /// `unregister` so awaiters fail instead of hanging.
        scope: Scope,
    },
    /// The most recently constructed session.
    Ready(Arc<Session>),
    /// Removed from the registry. Terminal: a `get` racing the removal may
    /// still hold a clone of the entry, and must not revive it.
    Closed,
}

/// Per-[`SessionId`] registry record.
pub(crate) struct Entry {
    pub(crate) id: SessionId,
    pub(crate) factory: SessionFactory,
    /// One-shot sessions are still handed out after they break; regular
    /// sessions are reconstructed on the next `get`.
    pub(crate) one_shot: bool,
    pub(crate) state: Mutex<EntryState>,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("one_shot", &self.one_shot)
            .finish_non_exhaustive()
    }
}

impl Entry {
    pub(crate) fn new(id: SessionId, factory: SessionFactory, one_shot: bool) -> Self {
        Self {
            id,
            factory,
            one_shot,
            state: Mutex::new(EntryState::Idle),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh construction attempt. Caller must hold the state lock
    /// and store the returned state before releasing it.
    pub(crate) fn begin_attempt(&self) -> (Attempt, EntryState) {
        let scope = Scope::new();
        let factory_future = (self.factory)(self.id.clone(), scope.clone());
        let attempt_scope = scope.clone();
        let attempt: Attempt = async move {
            tokio::select! {
                result = factory_future => result.map(Arc::new),
                // Unregister during construction: fail awaiters with the
                // recorded cause instead of hanging.
                () = attempt_scope.cancelled() => Err(attempt_scope.failure_or_closed()),
            }
        }
        .boxed()
        .shared();

        let state = EntryState::Constructing {
            attempt: attempt.clone(),
            scope,
        };
        (attempt, state)
    }

    /// Record the outcome of `attempt` if it is still the current one.
    pub(crate) fn settle(&self, attempt: &Attempt, outcome: &Result<Arc<Session>>) {
        let mut state = self.lock_state();
        if let EntryState::Constructing {
            attempt: current, ..
        } = &*state
        {
            if current.ptr_eq(attempt) {
                *state = match outcome {
                    Ok(session) => EntryState::Ready(Arc::clone(session)),
                    // Failures are never cached; the next get retries fresh.
                    Err(_) => EntryState::Idle,
                };
            }
        }
    }

    /// Close whatever this entry currently holds with `cause` and make the
    /// entry terminally unusable.
    pub(crate) fn close(&self, cause: &SessionError) {
        let state = {
            let mut guard = self.lock_state();
            std::mem::replace(&mut *guard, EntryState::Closed)
        };
        match state {
            EntryState::Idle | EntryState::Closed => {}
            EntryState::Constructing { scope, .. } => scope.cancel_with(cause.clone()),
            EntryState::Ready(session) => session.break_with(cause.clone()),
        }
    }
}
