//! Typed capability handles exposed by a connected session.
//!
//! The platform split is a closed tagged union: [`Capability`] promotes the
//! operations shared by both platforms, while POSIX-only operations (Unix
//! domain socket listening) are reachable only through the
//! [`PosixSession`] variant. There is no runtime platform check behind a
//! fat interface; unreachable operations do not exist on the other variant.

pub mod process;
pub mod tunnel;

use std::future::Future;
use std::sync::Arc;

use crate::errors::{DialError, ListenError, Result, SessionError, SpawnError};
use crate::remote::process::RemoteProcess;
use crate::remote::tunnel::{HostAddress, HostAddressBuilder, TunnelConnection};
use crate::rpc::{AgentRpc, SpawnSpec};
use crate::scope::Scope;

/// Which platform family the connected agent runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Unix-like remote; full signal set, Unix sockets available.
    Posix,
    /// Windows remote; interrupt is a no-op, terminate and kill coincide.
    Windows,
}

/// Shared per-session plumbing behind every typed handle: the RPC seam and
/// the operational scope used to race calls against session breakage.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    pub(crate) rpc: Arc<dyn AgentRpc>,
    pub(crate) scope: Scope,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Run one remote call, failing with the session-unavailability error
    /// (wrapped through `wrap`) if the session breaks concurrently.
    pub(crate) async fn guard<T, E, F>(
        &self,
        call: F,
        wrap: impl FnOnce(SessionError) -> E,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        if self.scope.is_cancelled() {
            return Err(wrap(self.scope.failure_or_closed()));
        }
        tokio::select! {
            result = call => result,
            () = self.scope.cancelled() => Err(wrap(self.scope.failure_or_closed())),
        }
    }
}

/// Capability object of a session to a POSIX agent.
#[derive(Debug)]
pub struct PosixSession {
    handle: SessionHandle,
}

impl PosixSession {
    /// Accept exactly one connection on a Unix domain socket on the remote
    /// machine; returns the socket path and the connection. Single-shot:
    /// call again in a loop to keep accepting.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError`] on bind/accept failure or session breakage.
    pub async fn listen_on_unix_socket(
        &self,
        path: Option<String>,
    ) -> Result<(String, TunnelConnection), ListenError> {
        tunnel::listen_unix(&self.handle, path).await
    }

    fn shared(&self) -> &SessionHandle {
        &self.handle
    }
}

/// Capability object of a session to a Windows agent.
#[derive(Debug)]
pub struct WindowsSession {
    handle: SessionHandle,
}

impl WindowsSession {
    fn shared(&self) -> &SessionHandle {
        &self.handle
    }
}

/// Typed handle exposing remote operations of one connected session.
#[derive(Debug)]
pub enum Capability {
    /// Agent on a Unix-like machine.
    Posix(PosixSession),
    /// Agent on a Windows machine.
    Windows(WindowsSession),
}

impl Capability {
    /// Capability for a POSIX agent.
    #[must_use]
    pub fn posix(rpc: Arc<dyn AgentRpc>, scope: Scope) -> Self {
        Self::Posix(PosixSession {
            handle: SessionHandle { rpc, scope },
        })
    }

    /// Capability for a Windows agent.
    #[must_use]
    pub fn windows(rpc: Arc<dyn AgentRpc>, scope: Scope) -> Self {
        Self::Windows(WindowsSession {
            handle: SessionHandle { rpc, scope },
        })
    }

    /// Platform family of the connected agent.
    #[must_use]
    pub fn platform(&self) -> Platform {
        match self {
            Self::Posix(_) => Platform::Posix,
            Self::Windows(_) => Platform::Windows,
        }
    }

    /// Start a process on the remote machine and return its IPC handle.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the agent rejects the request or the
    /// session breaks concurrently.
    pub async fn spawn_process(&self, spec: SpawnSpec) -> Result<RemoteProcess, SpawnError> {
        process::spawn(self.handle(), self.platform(), spec).await
    }

    /// Builder for a dial target; the only way to construct a
    /// [`HostAddress`].
    #[must_use]
    pub fn host_address(&self, host: impl Into<String>, port: u16) -> HostAddressBuilder {
        HostAddressBuilder::new(host, port)
    }

    /// Dial `address` from the remote machine.
    ///
    /// # Errors
    ///
    /// Returns [`DialError`] as a value; dial failure is an expected
    /// outcome.
    pub async fn connection_to_remote_port(
        &self,
        address: HostAddress,
    ) -> Result<TunnelConnection, DialError> {
        tunnel::dial(self.handle(), address).await
    }

    /// Dial `host:port`, run `body` with the connection, and always close
    /// the connection afterwards — also when `body` fails. Dial errors are
    /// delegated to `on_error` instead of being propagated as values.
    ///
    /// # Errors
    ///
    /// Propagates `body`'s (or `on_error`'s) error.
    pub async fn with_connection_to_remote_port<T, E>(
        &self,
        host: impl Into<String>,
        port: u16,
        on_error: impl FnOnce(DialError) -> Result<T, E> + Send,
        body: impl for<'a> FnOnce(
            &'a mut TunnelConnection,
        ) -> futures_util::future::BoxFuture<'a, Result<T, E>>
            + Send,
    ) -> Result<T, E> {
        let address = self.host_address(host, port).build();
        match tunnel::dial(self.handle(), address).await {
            Err(err) => on_error(err),
            Ok(mut connection) => {
                let outcome = body(&mut connection).await;
                connection.close().await;
                outcome
            }
        }
    }

    pub(crate) fn handle(&self) -> &SessionHandle {
        match self {
            Self::Posix(session) => session.shared(),
            Self::Windows(session) => session.shared(),
        }
    }
}
