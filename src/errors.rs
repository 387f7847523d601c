//! Error types shared across the runtime.
//!
//! The taxonomy follows the session/process layering: one "session
//! unavailable" family ([`SessionError`]) that escalates to the registry,
//! plus per-call families ([`SendStdinError`], [`ResizePtyError`],
//! [`DialError`], [`StreamError`], [`ListenError`]) that are local to the
//! one operation and never break the owning session, and the bootstrap
//! family ([`BootstrapError`]) that is fatal to a single provisioning run.

use std::fmt::{Display, Formatter};

/// Shared result type; defaults to the session-unavailability error.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

// ── Session unavailability ───────────────────────────────────────────────────

/// A session can no longer serve requests.
///
/// Any cancellation wrapping around one of these is unwrapped before it
/// reaches a caller, so callers always see the root cause rather than a
/// generic "cancelled" (see [`crate::scope::Scope`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session was closed deliberately by `unregister` or application
    /// shutdown.
    ClosedByApplication,
    /// The agent process died or the transport broke underneath the session.
    CommunicationFailure {
        /// Human-readable description, with recent stderr attached when the
        /// supervisor captured any.
        message: String,
        /// Whether the process exit that caused this was itself expected
        /// (orderly shutdown) rather than a crash.
        exit_expected: bool,
    },
}

impl SessionError {
    /// Communication-failure constructor for unexpected breakage.
    #[must_use]
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationFailure {
            message: message.into(),
            exit_expected: false,
        }
    }

    /// Communication-failure constructor for an orderly, expected exit.
    #[must_use]
    pub fn expected_exit(message: impl Into<String>) -> Self {
        Self::CommunicationFailure {
            message: message.into(),
            exit_expected: true,
        }
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClosedByApplication => write!(f, "session closed by the application"),
            Self::CommunicationFailure {
                message,
                exit_expected,
            } => {
                if *exit_expected {
                    write!(f, "session ended: {message}")
                } else {
                    write!(f, "session communication failure: {message}")
                }
            }
        }
    }
}

impl std::error::Error for SessionError {}

// ── Per-call families ────────────────────────────────────────────────────────

/// Failure of a confirmed stdin delivery to a remote process.
///
/// Both process-local variants are recoverable by the caller (stop writing);
/// neither marks the owning session as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStdinError {
    /// The remote process had already exited when the chunk arrived.
    ProcessExited,
    /// The stdin descriptor was already closed. The process may still be
    /// running; it can exit independently later.
    StdinClosed,
    /// The owning session broke concurrently with the call.
    SessionDown(SessionError),
}

impl Display for SendStdinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessExited => write!(f, "stdin delivery failed: process exited"),
            Self::StdinClosed => write!(f, "stdin delivery failed: stdin closed"),
            Self::SessionDown(err) => write!(f, "stdin delivery failed: {err}"),
        }
    }
}

impl std::error::Error for SendStdinError {}

/// Failure of a pty resize request, local to the one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizePtyError {
    /// The remote process is gone.
    ProcessExited,
    /// The process has no associated pseudo-terminal.
    NoPty,
    /// The remote OS rejected the resize.
    Errno {
        /// Raw errno value reported by the agent.
        code: i32,
        /// Remote `strerror` text.
        message: String,
    },
    /// The owning session broke concurrently with the call.
    SessionDown(SessionError),
}

impl Display for ResizePtyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessExited => write!(f, "pty resize failed: process exited"),
            Self::NoPty => write!(f, "pty resize failed: process has no pty"),
            Self::Errno { code, message } => {
                write!(f, "pty resize failed: errno {code}: {message}")
            }
            Self::SessionDown(err) => write!(f, "pty resize failed: {err}"),
        }
    }
}

impl std::error::Error for ResizePtyError {}

/// Failure to dial a socket from the remote machine.
///
/// Dial failure is an expected, common outcome, so these are returned as
/// values from the dial operation rather than escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialError {
    /// The address resolved to conflicting candidates.
    AmbiguousAddress,
    /// The remote side could not create a socket.
    SocketCreationFailure(String),
    /// No route to the host.
    HostUnreachable,
    /// The target actively refused the connection.
    ConnectionRefused,
    /// Name resolution failed on the remote machine.
    ResolveFailure(String),
    /// Catch-all for failures the agent could not classify.
    UnknownFailure(String),
    /// The owning session broke concurrently with the call.
    SessionDown(SessionError),
}

impl Display for DialError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AmbiguousAddress => write!(f, "dial failed: ambiguous address"),
            Self::SocketCreationFailure(reason) => {
                write!(f, "dial failed: socket creation failure: {reason}")
            }
            Self::HostUnreachable => write!(f, "dial failed: host unreachable"),
            Self::ConnectionRefused => write!(f, "dial failed: connection refused"),
            Self::ResolveFailure(reason) => write!(f, "dial failed: resolve failure: {reason}"),
            Self::UnknownFailure(reason) => write!(f, "dial failed: {reason}"),
            Self::SessionDown(err) => write!(f, "dial failed: {err}"),
        }
    }
}

impl std::error::Error for DialError {}

/// Exceptional close of an established tunnel stream.
///
/// A clean remote close simply ends the inbound channel; these variants are
/// delivered through the channel when the remote side resets or aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The remote peer reset the connection.
    ConnectionReset,
    /// The remote peer aborted the connection.
    ConnectionAborted,
    /// Catch-all for stream failures the agent could not classify.
    UnknownFailure(String),
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionReset => write!(f, "tunnel stream: connection reset"),
            Self::ConnectionAborted => write!(f, "tunnel stream: connection aborted"),
            Self::UnknownFailure(reason) => write!(f, "tunnel stream: {reason}"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Failure of a single-shot Unix-socket accept on the remote machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenError {
    /// Creating or binding the remote socket failed.
    Bind(String),
    /// The owning session broke concurrently with the call.
    SessionDown(SessionError),
}

impl Display for ListenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(reason) => write!(f, "unix socket listen failed: {reason}"),
            Self::SessionDown(err) => write!(f, "unix socket listen failed: {err}"),
        }
    }
}

impl std::error::Error for ListenError {}

/// Failure to spawn a new process through the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// The agent rejected or failed the spawn request.
    Failure(String),
    /// The owning session broke concurrently with the call.
    SessionDown(SessionError),
}

impl Display for SpawnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failure(reason) => write!(f, "remote spawn failed: {reason}"),
            Self::SessionDown(err) => write!(f, "remote spawn failed: {err}"),
        }
    }
}

impl std::error::Error for SpawnError {}

// ── Bootstrap ────────────────────────────────────────────────────────────────

/// Failure of a shell bootstrap run.
///
/// Any step failure force-destroys the shell process and surfaces here; a
/// fresh bootstrap run is required afterwards — there is no resume point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// The probe step did not produce the boundary and architecture lines
    /// within the configured bound.
    ProbeTimeout,
    /// I/O failure while speaking the shell protocol.
    Io(String),
    /// The shell closed its stdout before the protocol completed.
    ShellExited,
    /// `uname -pm` output did not match any supported platform.
    UnsupportedArchitecture(String),
    /// No local agent binary is available for the resolved platform.
    ///
    /// `message` is user-facing and suitable for direct display.
    MissingBinary {
        /// Platform identifier the resolver was asked for.
        platform: String,
        /// User-facing explanation from the resolver.
        message: String,
    },
    /// The RPC handshake after launch failed.
    Handshake(SessionError),
    /// The original error, augmented with the stderr captured by the
    /// supervising drain at the time of failure.
    WithStderr {
        /// The failure being annotated.
        source: Box<BootstrapError>,
        /// Recent stderr lines, newline-joined.
        stderr: String,
    },
}

impl BootstrapError {
    /// Wrap `self` with captured stderr text. Annotating an already
    /// annotated error replaces the attachment with the fresher capture.
    #[must_use]
    pub fn with_stderr(self, stderr: String) -> Self {
        match self {
            Self::WithStderr { source, .. } => Self::WithStderr { source, stderr },
            other => Self::WithStderr {
                source: Box::new(other),
                stderr,
            },
        }
    }

    /// The root failure, stripped of any stderr annotation.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::WithStderr { source, .. } => source.root(),
            other => other,
        }
    }
}

impl Display for BootstrapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProbeTimeout => write!(f, "bootstrap probe timed out"),
            Self::Io(reason) => write!(f, "bootstrap io error: {reason}"),
            Self::ShellExited => write!(f, "shell exited during bootstrap"),
            Self::UnsupportedArchitecture(uname) => {
                write!(f, "unsupported remote architecture: {uname}")
            }
            Self::MissingBinary { platform, message } => {
                write!(f, "no agent binary for {platform}: {message}")
            }
            Self::Handshake(err) => write!(f, "agent handshake failed: {err}"),
            Self::WithStderr { source, stderr } => {
                if stderr.is_empty() {
                    write!(f, "{source}")
                } else {
                    write!(f, "{source}\nremote stderr:\n{stderr}")
                }
            }
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WithStderr { source, .. } => Some(source.as_ref()),
            Self::Handshake(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// ── Identifiers and configuration ────────────────────────────────────────────

/// A candidate session identifier cannot be represented losslessly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSessionId {
    /// The rejected candidate.
    pub candidate: String,
    /// Which character made it unrepresentable.
    pub offending: char,
}

impl Display for InvalidSessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session id {:?} cannot be encoded as a uri authority: illegal character {:?}",
            self.candidate, self.offending
        )
    }
}

impl std::error::Error for InvalidSessionId {}

/// Configuration parsing or validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "config: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self(format!("invalid config: {err}"))
    }
}
