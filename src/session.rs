//! Session identifiers and the live session value.

use std::fmt::{Display, Formatter};

use uuid::Uuid;

use crate::errors::{InvalidSessionId, SessionError};
use crate::remote::Capability;
use crate::scope::Scope;

/// Opaque, globally-unique registry key for a session.
///
/// The identifier must round-trip losslessly through a URI-style encoding:
/// it is constrained to the characters legal in a URI authority component
/// with no userinfo, port, path, or query. [`SessionId::parse`] rejects
/// anything that would need escaping; [`SessionId::mint`] derives a fresh
/// unique id from an arbitrary display name by replacing illegal characters
/// and appending a random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Validate `candidate` as a session identifier.
    ///
    /// Legal characters are the URI `reg-name` set: ASCII alphanumerics,
    /// `-._~`, and the sub-delims `!$&'()*+,;=`. In particular `@` and `:`
    /// are rejected because they would introduce a userinfo or port
    /// component when the id is embedded in a URI authority.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSessionId`] naming the first offending character,
    /// or for an empty candidate (reported as offending `'\0'`).
    pub fn parse(candidate: &str) -> Result<Self, InvalidSessionId> {
        if candidate.is_empty() {
            return Err(InvalidSessionId {
                candidate: String::new(),
                offending: '\0',
            });
        }

        match candidate.chars().find(|c| !Self::is_legal(*c)) {
            None => Ok(Self(candidate.to_owned())),
            Some(offending) => Err(InvalidSessionId {
                candidate: candidate.to_owned(),
                offending,
            }),
        }
    }

    /// Mint a fresh, globally-unique id derived from `name`.
    ///
    /// Illegal characters in `name` are replaced with `-`; a random 32-char
    /// suffix guarantees uniqueness across mints of the same name.
    #[must_use]
    pub fn mint(name: &str) -> Self {
        let mut sanitized: String = name
            .chars()
            .map(|c| if Self::is_legal(c) { c } else { '-' })
            .collect();
        if sanitized.is_empty() {
            sanitized.push_str("session");
        }
        Self(format!("{sanitized}-{}", Uuid::new_v4().simple()))
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_legal(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') || matches!(c, '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+' | ',' | ';' | '=')
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live RPC connection to a running agent, plus the OS process hosting
/// it (owned indirectly through the operational scope's supervisor tasks).
///
/// Immutable once constructed. The session transitions to broken the first
/// time anything cancels its operational scope; a broken session is never
/// handed out again by the registry (unless registered one-shot).
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    capability: Capability,
    scope: Scope,
}

impl Session {
    /// Bundle a capability object with the operational scope that owns the
    /// agent process supervising tasks.
    #[must_use]
    pub fn new(id: SessionId, capability: Capability, scope: Scope) -> Self {
        Self {
            id,
            capability,
            scope,
        }
    }

    /// Registry key of this session.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The typed handle exposing remote process and tunnel operations.
    #[must_use]
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Operational scope; cancelling it tears the session down.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether the session can still serve requests.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.scope.is_cancelled()
    }

    /// Mark the session broken with `cause`, tearing down its process.
    pub fn break_with(&self, cause: SessionError) {
        self.scope.cancel_with(cause);
    }

    /// Close the session deliberately (application-initiated).
    pub fn close(&self) {
        self.scope.cancel_with(SessionError::ClosedByApplication);
    }

    /// The unavailability error describing why the session broke.
    ///
    /// Meaningful only once [`Session::is_usable`] is false.
    #[must_use]
    pub fn failure(&self) -> SessionError {
        self.scope.failure_or_closed()
    }
}
