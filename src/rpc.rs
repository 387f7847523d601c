//! Transport seam between the session runtime and the RPC plumbing.
//!
//! The gRPC-like request/response transport is an external collaborator.
//! This module defines the two traits the runtime consumes — [`Connector`]
//! (turn an agent process's stdio into a per-call handle) and [`AgentRpc`]
//! (the per-call remote operations) — plus the wire-level value types both
//! sides share. Trait methods return `Pin<Box<dyn Future>>` so the traits
//! stay object-safe and test fakes can implement them directly.
//!
//! Implementor obligations (spelled out here because the runtime's typed
//! handles rely on them):
//!
//! - Concurrent calls on one [`AgentRpc`] must be multiplexed or serialized
//!   safely by the transport.
//! - A call whose future is dropped mid-flight must be completed or
//!   explicitly abandoned on the remote side, never left ambiguous.
//! - The unconfirmed stdin sink of a [`SpawnedProcess`] flushes each chunk
//!   individually, in submission order, with no coalescing.
//! - Exit-code delivery happens after all stdout/stderr bytes produced
//!   before the exit have been delivered to their channels.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::errors::{
    DialError, ListenError, ResizePtyError, Result, SendStdinError, SpawnError, StreamError,
};
use crate::remote::tunnel::HostAddress;
use crate::scope::Scope;

/// POSIX signal selector for remote processes.
///
/// Windows agents implement `Terminate` and `Kill` identically and ignore
/// `Interrupt`; the capability layer encodes that difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGKILL.
    Kill,
}

/// Pseudo-terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Terminal width in columns.
    pub columns: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

/// Request to start a process on the remote machine through the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Executable path or name resolved on the remote machine.
    pub exe: String,
    /// Arguments, argv\[1..\].
    pub args: Vec<String>,
    /// Extra environment entries for the child.
    pub env: Vec<(String, String)>,
    /// Working directory; agent default when absent.
    pub working_dir: Option<String>,
    /// Allocate a pty of this size instead of pipes.
    pub pty: Option<PtySize>,
}

impl SpawnSpec {
    /// Spec for `exe` with no arguments, default environment and cwd.
    #[must_use]
    pub fn new(exe: impl Into<String>) -> Self {
        Self {
            exe: exe.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            pty: None,
        }
    }
}

/// Channel endpoints for a process the agent reports as started.
///
/// `stdin` is the unconfirmed sink: submission order is delivery order, one
/// write per chunk. `exit` resolves exactly once, after both output
/// channels have drained everything produced before the exit.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Remote process identifier.
    pub pid: u32,
    /// Unconfirmed stdin sink.
    pub stdin: mpsc::Sender<Bytes>,
    /// Stdout chunks; closes when the remote descriptor closes.
    pub stdout: mpsc::Receiver<Bytes>,
    /// Stderr chunks; closes when the remote descriptor closes.
    pub stderr: mpsc::Receiver<Bytes>,
    /// Single-shot exit code.
    pub exit: oneshot::Receiver<i32>,
}

/// Identifier of one established tunnel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Channel pair bound to one accepted or established remote socket.
#[derive(Debug)]
pub struct TunnelStreams {
    /// Connection identifier for option setters and close.
    pub id: ConnectionId,
    /// Bytes written here are sent to the remote socket.
    pub outbound: mpsc::Sender<Bytes>,
    /// Bytes received from the remote socket. A clean remote close ends
    /// the channel; resets/aborts deliver an `Err` before it ends.
    pub inbound: mpsc::Receiver<Result<Bytes, StreamError>>,
}

/// A single socket option assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// `SO_SNDBUF`.
    SendBufferSize(u32),
    /// `SO_RCVBUF`.
    ReceiveBufferSize(u32),
    /// `SO_KEEPALIVE`.
    KeepAlive(bool),
    /// `SO_REUSEADDR`.
    ReuseAddr(bool),
    /// `SO_LINGER`; `None` disables lingering.
    Linger(Option<Duration>),
    /// `TCP_NODELAY`.
    NoDelay(bool),
}

/// Per-call remote operations exposed by a connected agent.
///
/// One value of this trait backs one session's capability object; it may be
/// used concurrently by many callers.
pub trait AgentRpc: Send + Sync {
    /// Start a process on the remote machine.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the agent rejects or fails the request.
    fn spawn_process(
        &self,
        spec: SpawnSpec,
    ) -> Pin<Box<dyn Future<Output = Result<SpawnedProcess, SpawnError>> + Send + '_>>;

    /// Deliver one stdin chunk with confirmation; resolves once the agent
    /// acknowledges the chunk reached the remote process.
    ///
    /// # Errors
    ///
    /// Returns [`SendStdinError::ProcessExited`] or
    /// [`SendStdinError::StdinClosed`] as reported by the agent.
    fn send_stdin(
        &self,
        pid: u32,
        chunk: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendStdinError>> + Send + '_>>;

    /// Deliver a signal to a remote process. Signalling an already-exited
    /// process is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`](crate::errors::SessionError) if the transport broke.
    fn send_signal(
        &self,
        pid: u32,
        signal: Signal,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Resize the pty of a remote process.
    ///
    /// # Errors
    ///
    /// Returns [`ResizePtyError`] as reported by the agent.
    fn resize_pty(
        &self,
        pid: u32,
        size: PtySize,
    ) -> Pin<Box<dyn Future<Output = Result<(), ResizePtyError>> + Send + '_>>;

    /// Dial `address` from the remote machine.
    ///
    /// # Errors
    ///
    /// Returns [`DialError`]; dial failure is an expected outcome.
    fn dial(
        &self,
        address: HostAddress,
    ) -> Pin<Box<dyn Future<Output = Result<TunnelStreams, DialError>> + Send + '_>>;

    /// Apply one socket option to an established connection.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection is gone.
    fn set_socket_option(
        &self,
        id: ConnectionId,
        option: SocketOption,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;

    /// Close an established connection. Closing twice is a no-op.
    fn close_connection(
        &self,
        id: ConnectionId,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Accept exactly one connection on a Unix domain socket on the remote
    /// machine. `path` fixes the socket path; `None` lets the agent create
    /// a fresh one. Single-shot: call again to accept again.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError`] when binding or accepting fails.
    fn listen_unix_socket(
        &self,
        path: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<(String, TunnelStreams), ListenError>> + Send + '_>>;
}

/// Byte-stream pair of a launched agent process, handed to a [`Connector`].
///
/// Boxed trait objects so the same handshake code serves real child stdio
/// and in-memory test streams.
pub struct AgentStdio {
    /// Agent's stdin (client → agent).
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Agent's stdout (agent → client).
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for AgentStdio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStdio").finish_non_exhaustive()
    }
}

/// RPC handshake: turns a running agent's stdio into an [`AgentRpc`] handle.
///
/// The connector owns the stdio pair afterwards and must parent its pump
/// tasks to `scope` so session teardown stops them (and drops the agent's
/// stdin, signalling EOF).
pub trait Connector: Send + Sync {
    /// Perform the handshake over `stdio`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`](crate::errors::SessionError) if the handshake fails or times out.
    fn connect(
        &self,
        stdio: AgentStdio,
        scope: Scope,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn AgentRpc>>> + Send + '_>>;
}
