//! Keyed table of lazily-constructed, auto-recreated agent sessions.
//!
//! Callers register a factory under a freshly minted [`SessionId`] and
//! later ask for the session by id. Construction is lazy, at most one
//! attempt is in flight per key at any instant, concurrent requesters
//! share the in-flight attempt, and a session that breaks (or a factory
//! that fails) is never handed out again — the next `get` constructs a
//! fresh one.

mod entry;

pub use entry::SessionFactory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::errors::{Result, SessionError};
use crate::registry::entry::{Entry, EntryState};
use crate::session::{Session, SessionId};

/// Concurrent registry of agent sessions keyed by [`SessionId`].
///
/// The keyed map is locked only for lookup, insert, and remove; all
/// construction-state transitions happen under the per-entry lock, so
/// unrelated ids never contend.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, Arc<Entry>>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `factory` under a fresh [`SessionId`] derived from `name`.
    /// Does not start construction.
    pub fn register(&self, name: &str, factory: SessionFactory) -> SessionId {
        self.insert(name, factory, false)
    }

    /// Like [`SessionRegistry::register`], but the session is handed out
    /// even after it breaks — for callers that want a single short-lived
    /// session and handle brokenness themselves.
    pub fn register_one_shot(&self, name: &str, factory: SessionFactory) -> SessionId {
        self.insert(name, factory, true)
    }

    fn insert(&self, name: &str, factory: SessionFactory, one_shot: bool) -> SessionId {
        let id = SessionId::mint(name);
        let entry = Arc::new(Entry::new(id.clone(), factory, one_shot));
        self.lock_entries().insert(id.clone(), entry);
        info!(session_id = %id, one_shot, "registered session factory");
        id
    }

    /// Remove the entry for `id`, closing any in-flight construction or
    /// live session with "closed by application". Returns whether an entry
    /// existed.
    pub fn unregister(&self, id: &SessionId) -> bool {
        let removed = self.lock_entries().remove(id);
        match removed {
            None => false,
            Some(entry) => {
                entry.close(&SessionError::ClosedByApplication);
                info!(session_id = %id, "unregistered session");
                true
            }
        }
    }

    /// Close and remove every entry. For application shutdown.
    pub fn unregister_all(&self) {
        let drained: Vec<Arc<Entry>> = {
            let mut entries = self.lock_entries();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.close(&SessionError::ClosedByApplication);
        }
    }

    /// Current live session for `id`, constructing it if absent or if the
    /// previous session is no longer running.
    ///
    /// Suspends while a construction is in flight; concurrent callers share
    /// the same attempt. The decision to reuse or start an attempt and the
    /// start itself happen inside a single atomic update of the entry, so
    /// exactly one physical construction is outstanding per id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ClosedByApplication`] for an unknown or
    /// concurrently unregistered id, and the factory's unavailability error
    /// (unwrapped through any cancellation) when construction fails. Failed
    /// attempts are not cached; the next call retries fresh.
    pub async fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        loop {
            let entry = self
                .lock_entries()
                .get(id)
                .cloned()
                .ok_or(SessionError::ClosedByApplication)?;

            if let Some(session) = Self::obtain(&entry).await? {
                return Ok(session);
            }
            // Broke between construction and hand-out; reconstruct.
        }
    }

    /// One reuse-or-construct round against `entry`. `None` means the
    /// constructed session was already unusable at hand-out and the caller
    /// should retry from the map lookup.
    async fn obtain(entry: &Arc<Entry>) -> Result<Option<Arc<Session>>> {
        let attempt = {
            let mut state = entry.lock_state();
            match &*state {
                // An unregister won the race after the map lookup handed
                // this entry out; it must never be revived.
                EntryState::Closed => return Err(SessionError::ClosedByApplication),
                EntryState::Ready(session) if session.is_usable() || entry.one_shot => {
                    return Ok(Some(Arc::clone(session)));
                }
                EntryState::Constructing { attempt, .. } => attempt.clone(),
                // Idle, or a Ready session that is no longer running.
                _ => {
                    debug!(session_id = %entry.id, "starting session construction");
                    let (attempt, next) = entry.begin_attempt();
                    *state = next;
                    attempt
                }
            }
        };

        let outcome = attempt.clone().await;
        entry.settle(&attempt, &outcome);

        match outcome {
            Ok(session) if session.is_usable() || entry.one_shot => Ok(Some(session)),
            Ok(_) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
