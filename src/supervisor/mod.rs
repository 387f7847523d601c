//! Agent process supervision.
//!
//! [`ProcessSupervisor::launch`] wraps a live OS process in three
//! concurrent activities:
//!
//! - a stderr drain (parented to the **diagnostics** scope so trailing log
//!   lines are not truncated by session teardown) that routes each line to
//!   structured logging and retains the most recent lines for failure
//!   reports;
//! - an exit awaiter that compares the observed exit against the current
//!   [`ExpectedExit`] classification and, for unexpected exits, cancels the
//!   **operational** scope with a descriptive communication-failure cause;
//! - a teardown finalizer that, when the operational scope is cancelled for
//!   any reason, marks any exit expected, closes the process's stdin to
//!   signal EOF, and force-kills after a bounded grace period.
//!
//! Scope cancellation is the only path that tears down the OS process;
//! callers never invoke kill APIs directly.

pub mod stderr;

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::process::Child;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::errors::{BootstrapError, SessionError};
use crate::scope::Scope;
use crate::session::SessionId;
use crate::supervisor::stderr::{RecentStderr, StderrCodec};

/// The supervisor's belief about whether the agent process may exit.
///
/// Transitions are monotonic: once `Any` is set it is never reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExpectedExit {
    /// Normal operation; any exit is a failure.
    Unexpected = 0,
    /// Graceful shutdown requested; the process must exit 0.
    Zero = 1,
    /// Forced teardown; any exit code is fine.
    Any = 2,
}

impl ExpectedExit {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Zero,
            2 => Self::Any,
            _ => Self::Unexpected,
        }
    }
}

/// Errors that can carry a recent-stderr diagnostic attachment.
pub trait AttachStderr {
    /// Return `self` augmented with the captured stderr text.
    #[must_use]
    fn attach_stderr(self, stderr: String) -> Self;
}

impl AttachStderr for BootstrapError {
    fn attach_stderr(self, stderr: String) -> Self {
        self.with_stderr(stderr)
    }
}

impl AttachStderr for SessionError {
    fn attach_stderr(self, stderr: String) -> Self {
        match self {
            Self::CommunicationFailure {
                message,
                exit_expected,
            } if !stderr.is_empty() => Self::CommunicationFailure {
                message: format!("{message}\nrecent stderr:\n{stderr}"),
                exit_expected,
            },
            other => other,
        }
    }
}

/// Supervisor handle for one agent OS process.
///
/// Cheap to clone; all state is shared with the background tasks.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    id: SessionId,
    expected: Arc<AtomicU8>,
    recent: Arc<RecentStderr>,
    attach_grace: Duration,
}

impl ProcessSupervisor {
    /// Start supervising `child`.
    ///
    /// The stderr drain is parented to `diagnostics`; the exit awaiter and
    /// teardown finalizer to `operational`. Returns immediately.
    #[must_use]
    pub fn launch(
        operational: &Scope,
        diagnostics: &Scope,
        mut child: Child,
        id: SessionId,
        config: &SupervisorConfig,
    ) -> Self {
        let supervisor = Self {
            id: id.clone(),
            expected: Arc::new(AtomicU8::new(ExpectedExit::Unexpected as u8)),
            recent: Arc::new(RecentStderr::new(config.stderr_history_lines)),
            attach_grace: config.stderr_attach_grace(),
        };

        info!(session_id = %id, pid = child.id(), "supervising agent process");

        if let Some(pipe) = child.stderr.take() {
            let drain_scope = diagnostics.clone();
            let recent = Arc::clone(&supervisor.recent);
            let drain_id = id.clone();
            let max_line = config.max_stderr_line_bytes;
            diagnostics.spawn(async move {
                drain_stderr(pipe, &drain_scope, &recent, &drain_id, max_line).await;
            });
        } else {
            debug!(session_id = %id, "agent process has no stderr pipe to drain");
        }

        let op = operational.clone();
        let expected = Arc::clone(&supervisor.expected);
        let recent = Arc::clone(&supervisor.recent);
        let grace = config.shutdown_grace();
        operational.spawn(async move {
            tokio::select! {
                result = child.wait() => {
                    handle_exit(&op, &id, &expected, &recent, result);
                }
                () = op.cancelled() => {
                    finalize(&id, &expected, &mut child, grace).await;
                }
            }
        });

        supervisor
    }

    /// Current exit classification.
    #[must_use]
    pub fn expected_exit(&self) -> ExpectedExit {
        ExpectedExit::from_u8(self.expected.load(Ordering::SeqCst))
    }

    /// Update the exit classification. Once `Any` has been set the request
    /// is ignored (monotonic).
    pub fn set_expected_exit(&self, expected: ExpectedExit) {
        let _ = self
            .expected
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == ExpectedExit::Any as u8 {
                    None
                } else {
                    Some(expected as u8)
                }
            });
    }

    /// Newline-joined snapshot of the retained stderr tail.
    #[must_use]
    pub fn recent_stderr(&self) -> String {
        self.recent.snapshot()
    }

    /// Run `body`; on failure, wait a bounded grace period for trailing
    /// stderr to arrive, then re-surface the error augmented with the
    /// captured stderr text.
    ///
    /// # Errors
    ///
    /// Propagates `body`'s error, annotated.
    pub async fn attach_recent_stderr<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: AttachStderr,
    {
        match body.await {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(
                    session_id = %self.id,
                    grace = ?self.attach_grace,
                    "waiting for trailing stderr before reporting failure"
                );
                tokio::time::sleep(self.attach_grace).await;
                Err(err.attach_stderr(self.recent.snapshot()))
            }
        }
    }
}

// ── Background activities ────────────────────────────────────────────────────

async fn drain_stderr(
    pipe: tokio::process::ChildStderr,
    scope: &Scope,
    recent: &RecentStderr,
    id: &SessionId,
    max_line_bytes: usize,
) {
    let mut lines = FramedRead::new(pipe, StderrCodec::new(max_line_bytes));
    loop {
        tokio::select! {
            item = lines.next() => match item {
                Some(Ok(line)) => {
                    stderr::route(id, &line);
                    recent.push(line);
                }
                Some(Err(err)) => {
                    // Read failures never fail the supervised process.
                    debug!(session_id = %id, %err, "stderr read error, continuing drain");
                }
                None => {
                    debug!(session_id = %id, "agent stderr closed");
                    break;
                }
            },
            () = scope.cancelled() => {
                debug!(session_id = %id, "diagnostics scope cancelled, stopping stderr drain");
                break;
            }
        }
    }
}

fn handle_exit(
    op: &Scope,
    id: &SessionId,
    expected: &AtomicU8,
    recent: &RecentStderr,
    result: std::io::Result<std::process::ExitStatus>,
) {
    let status = match result {
        Ok(status) => status,
        Err(err) => {
            warn!(session_id = %id, %err, "error awaiting agent process");
            op.cancel_with(SessionError::communication(format!(
                "failed to await agent process: {err}"
            )));
            return;
        }
    };

    let code = status.code();
    let status_text = code.map_or_else(
        || "terminated by signal".to_owned(),
        |c| format!("exited with code {c}"),
    );

    match ExpectedExit::from_u8(expected.load(Ordering::SeqCst)) {
        ExpectedExit::Any => {
            debug!(session_id = %id, status = %status_text, "agent process exited during teardown");
        }
        ExpectedExit::Zero if code == Some(0) => {
            info!(session_id = %id, "agent process exited cleanly");
        }
        classification => {
            let during_shutdown = classification == ExpectedExit::Zero;
            let phase = if during_shutdown {
                "during shutdown (exit 0 required)"
            } else {
                "unexpectedly"
            };
            let tail = recent.snapshot();
            error!(
                session_id = %id,
                status = %status_text,
                recent_stderr = %tail,
                "agent process {status_text} {phase}"
            );
            let message = format!("agent process {status_text} {phase}");
            // An exit during a requested shutdown was itself expected, even
            // though the code disqualifies it as clean.
            let cause = if during_shutdown {
                SessionError::expected_exit(message)
            } else {
                SessionError::communication(message)
            }
            .attach_stderr(tail);
            op.cancel_with(cause);
        }
    }
}

async fn finalize(id: &SessionId, expected: &AtomicU8, child: &mut Child, grace: Duration) {
    expected.store(ExpectedExit::Any as u8, Ordering::SeqCst);

    // Closing stdin signals EOF; the agent treats it as a shutdown request.
    // When the transport owns stdin its teardown drops the handle instead.
    drop(child.stdin.take());

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(session_id = %id, ?status, "agent process exited within grace period");
        }
        Ok(Err(err)) => {
            warn!(session_id = %id, %err, "error awaiting agent process during teardown");
        }
        Err(_) => {
            warn!(
                session_id = %id,
                grace = ?grace,
                "agent process did not exit within grace period, forcing kill"
            );
            if let Err(err) = child.kill().await {
                warn!(session_id = %id, %err, "failed to force-kill agent process");
            }
        }
    }
}
