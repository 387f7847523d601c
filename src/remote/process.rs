//! IPC handle for a process started *through* the agent.
//!
//! Distinct from the agent's own OS process: a [`RemoteProcess`] is created
//! when the agent reports that a new remote process was started, and all of
//! its operations travel over the session's RPC seam. Every operation also
//! fails with the session-unavailability error if the owning session breaks
//! concurrently with the call.

use bytes::Bytes;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{ResizePtyError, Result, SendStdinError, SessionError, SpawnError};
use crate::remote::{Platform, SessionHandle};
use crate::rpc::{PtySize, Signal, SpawnSpec, SpawnedProcess};

type ExitFuture = Shared<BoxFuture<'static, Result<i32>>>;

/// Unconfirmed stdin sink of a remote process.
///
/// Each chunk is flushed to the remote process individually and
/// immediately, in submission order, with no client-side coalescing (the
/// transport contract). Delivery is not acknowledged; use
/// [`RemoteProcess::send_stdin_with_confirmation`] when it must be.
#[derive(Debug, Clone)]
pub struct StdinSink {
    tx: mpsc::Sender<Bytes>,
}

impl StdinSink {
    /// Submit one chunk.
    ///
    /// # Errors
    ///
    /// Returns [`SendStdinError::StdinClosed`] once the stdin side is gone.
    pub async fn send(&self, chunk: Bytes) -> Result<(), SendStdinError> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| SendStdinError::StdinClosed)
    }
}

/// Typed handle for one process running on the remote machine.
#[derive(Debug)]
pub struct RemoteProcess {
    pid: u32,
    platform: Platform,
    handle: SessionHandle,
    stdin: StdinSink,
    stdout: Option<mpsc::Receiver<Bytes>>,
    stderr: Option<mpsc::Receiver<Bytes>>,
    exit: ExitFuture,
}

/// Issue the spawn call and wrap the reported process.
pub(crate) async fn spawn(
    handle: &SessionHandle,
    platform: Platform,
    spec: SpawnSpec,
) -> Result<RemoteProcess, SpawnError> {
    let rpc = handle.rpc.clone();
    let spawned = handle
        .guard(rpc.spawn_process(spec), SpawnError::SessionDown)
        .await?;
    debug!(pid = spawned.pid, "agent reported remote process started");
    Ok(RemoteProcess::new(spawned, platform, handle.clone()))
}

impl RemoteProcess {
    pub(crate) fn new(spawned: SpawnedProcess, platform: Platform, handle: SessionHandle) -> Self {
        let SpawnedProcess {
            pid,
            stdin,
            stdout,
            stderr,
            exit,
        } = spawned;

        // Exit observation races session breakage so a dead session cannot
        // leave the exit future pending forever.
        let scope = handle.scope.clone();
        let exit: ExitFuture = async move {
            tokio::select! {
                code = exit => code.map_err(|_| {
                    SessionError::communication("exit channel closed without a code")
                }),
                () = scope.cancelled() => Err(scope.failure_or_closed()),
            }
        }
        .boxed()
        .shared();

        Self {
            pid,
            platform,
            handle,
            stdin: StdinSink { tx: stdin },
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit,
        }
    }

    /// Remote process identifier.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The unconfirmed stdin sink.
    #[must_use]
    pub fn stdin(&self) -> StdinSink {
        self.stdin.clone()
    }

    /// Take ownership of the stdout chunk source. The channel closes when
    /// the remote process closes the descriptor.
    pub fn take_stdout(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.stdout.take()
    }

    /// Take ownership of the stderr chunk source.
    pub fn take_stderr(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.stderr.take()
    }

    /// Exit code of the remote process; resolves exactly once.
    ///
    /// Exit observation happens after all stdout/stderr bytes produced
    /// before the exit have been delivered to their channels.
    ///
    /// # Errors
    ///
    /// Returns the session-unavailability error if the session breaks
    /// before an exit code arrives.
    pub async fn exit_code(&self) -> Result<i32> {
        self.exit.clone().await
    }

    /// Deliver one stdin chunk and suspend until the agent acknowledges it
    /// reached the remote process.
    ///
    /// # Errors
    ///
    /// [`SendStdinError::ProcessExited`] if the process had already exited;
    /// [`SendStdinError::StdinClosed`] if only stdin was closed (the
    /// process may still be running); [`SendStdinError::SessionDown`] if
    /// the session broke concurrently.
    pub async fn send_stdin_with_confirmation(
        &self,
        chunk: Bytes,
    ) -> Result<(), SendStdinError> {
        let rpc = self.handle.rpc.clone();
        self.handle
            .guard(rpc.send_stdin(self.pid, chunk), SendStdinError::SessionDown)
            .await
    }

    /// SIGINT on POSIX; a no-op on Windows.
    ///
    /// # Errors
    ///
    /// Returns the session-unavailability error if the session broke.
    pub async fn interrupt(&self) -> Result<()> {
        match self.platform {
            Platform::Posix => self.signal(Signal::Interrupt).await,
            Platform::Windows => Ok(()),
        }
    }

    /// SIGTERM on POSIX; on Windows requests termination (no graceful
    /// distinction exists there).
    ///
    /// # Errors
    ///
    /// Returns the session-unavailability error if the session broke.
    pub async fn terminate(&self) -> Result<()> {
        match self.platform {
            Platform::Posix => self.signal(Signal::Terminate).await,
            Platform::Windows => self.signal(Signal::Kill).await,
        }
    }

    /// SIGKILL on POSIX; on Windows identical to [`RemoteProcess::terminate`].
    ///
    /// # Errors
    ///
    /// Returns the session-unavailability error if the session broke.
    pub async fn kill(&self) -> Result<()> {
        self.signal(Signal::Kill).await
    }

    /// Resize the pseudo-terminal of the remote process.
    ///
    /// # Errors
    ///
    /// [`ResizePtyError::ProcessExited`] if the process is gone,
    /// [`ResizePtyError::NoPty`] if it has no pty, [`ResizePtyError::Errno`]
    /// for OS-level failures, all local to this call.
    pub async fn resize_pty(&self, columns: u16, rows: u16) -> Result<(), ResizePtyError> {
        let rpc = self.handle.rpc.clone();
        self.handle
            .guard(
                rpc.resize_pty(self.pid, PtySize { columns, rows }),
                ResizePtyError::SessionDown,
            )
            .await
    }

    async fn signal(&self, signal: Signal) -> Result<()> {
        let rpc = self.handle.rpc.clone();
        self.handle
            .guard(rpc.send_signal(self.pid, signal), |err| err)
            .await
    }
}
