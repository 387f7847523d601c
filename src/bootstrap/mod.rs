//! Agent deployment over an already-connected POSIX shell.
//!
//! The caller opens a byte-stream shell on the target machine (typically
//! `ssh <host> /bin/sh` as a local child process); this module speaks the
//! deployment protocol over that shell's stdin/stdout:
//!
//! 1. **Probe** — print a random boundary line, then `uname -pm`. Noise
//!    printed by login machinery before the boundary is skipped.
//! 2. **Upload** — a script reads exactly the binary's byte count from the
//!    shell's stdin into a fresh private directory, makes it executable,
//!    and echoes the path back.
//! 3. **Launch** — `exec` the uploaded binary under the user's login
//!    shell, replacing the remote shell process.
//!
//! After launch the same byte streams carry the agent's RPC protocol and
//! are handed to a [`Connector`]. Any failure is terminal for the shell:
//! the process is destroyed and the error carries the stderr captured up
//! to that point.

pub mod platform;
pub mod script;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bootstrap::platform::{BinaryResolver, TargetPlatform};
use crate::bootstrap::script::{launch_command, upload_script, AgentLaunchOptions};
use crate::config::RuntimeConfig;
use crate::errors::BootstrapError;
use crate::remote::Capability;
use crate::rpc::{AgentRpc, AgentStdio, Connector};
use crate::scope::Scope;
use crate::session::{Session, SessionId};
use crate::supervisor::ProcessSupervisor;

// ── Protocol ─────────────────────────────────────────────────────────────────

/// What a completed deployment left behind on the remote machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// Architecture the remote machine reported.
    pub platform: TargetPlatform,
    /// Absolute path of the uploaded agent binary.
    pub remote_path: String,
}

/// Read one `\n`-terminated line, one byte at a time.
///
/// Byte-at-a-time keeps the read cursor exactly at the line boundary, so
/// no bytes belonging to the agent protocol are swallowed into a buffer.
async fn read_line<R>(reader: &mut R) -> Result<String, BootstrapError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            return Err(BootstrapError::ShellExited);
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Probe step: returns the remote's `uname -pm` line.
async fn probe<R, W>(reader: &mut R, writer: &mut W) -> Result<String, BootstrapError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let boundary = Uuid::new_v4().simple().to_string();
    writer
        .write_all(format!("echo {boundary}; uname -pm\n").as_bytes())
        .await?;
    writer.flush().await?;

    // Shell/login banners may precede the boundary; skip until it appears.
    loop {
        let line = read_line(reader).await?;
        if line.trim() == boundary {
            break;
        }
        debug!(line = %line, "skipping pre-boundary shell output");
    }
    loop {
        let line = read_line(reader).await?;
        if !line.trim().is_empty() {
            return Ok(line);
        }
    }
}

/// Run the probe/upload/launch protocol over an arbitrary stdio pair.
///
/// Separated from process handling so the protocol is exercisable against
/// in-memory streams.
///
/// # Errors
///
/// Returns [`BootstrapError`] on any protocol step failure; the shell
/// behind the streams must be considered unusable afterwards.
pub async fn deploy_over<R, W>(
    config: &RuntimeConfig,
    resolver: &dyn BinaryResolver,
    options: &AgentLaunchOptions,
    reader: &mut R,
    writer: &mut W,
) -> Result<BootstrapOutcome, BootstrapError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let uname = timeout(config.bootstrap.probe_timeout(), probe(reader, writer))
        .await
        .map_err(|_| BootstrapError::ProbeTimeout)??;
    let platform = TargetPlatform::from_uname(&uname)?;
    debug!(%platform, uname = %uname.trim(), "remote architecture resolved");

    let local_path = resolver.resolve(platform)?;
    let binary = tokio::fs::read(&local_path).await?;

    writer
        .write_all(upload_script(&config.bootstrap.remote_binary_name, binary.len()).as_bytes())
        .await?;
    writer.write_all(&binary).await?;
    writer.flush().await?;

    let remote_path = loop {
        let line = read_line(reader).await?;
        if !line.trim().is_empty() {
            break line.trim().to_owned();
        }
    };
    info!(%platform, remote_path = %remote_path, bytes = binary.len(), "agent binary uploaded");

    launch_at(writer, &remote_path, options).await?;
    Ok(BootstrapOutcome {
        platform,
        remote_path,
    })
}

/// Launch step for a binary already present at `remote_path`; also the
/// entry point when deployment was done out of band.
///
/// # Errors
///
/// Returns [`BootstrapError::Io`] when the launch command cannot be sent.
pub async fn launch_at<W>(
    writer: &mut W,
    remote_path: &str,
    options: &AgentLaunchOptions,
) -> Result<(), BootstrapError>
where
    W: AsyncWrite + Unpin,
{
    let working_dir = match remote_path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir,
        _ => "/",
    };
    let argv = options.render_argv(remote_path);
    writer
        .write_all(launch_command(working_dir, &argv).as_bytes())
        .await?;
    writer.flush().await?;
    debug!(remote_path = %remote_path, "agent launch command sent");
    Ok(())
}

// ── Session orchestration ────────────────────────────────────────────────────

/// Deploy the agent through `shell`, hand the streams to `connector`, and
/// assemble a live [`Session`].
///
/// `shell` must have been spawned with piped stdin, stdout, and stderr.
/// Its exit is supervised under `scope`; a failed bootstrap destroys the
/// shell and surfaces the error with the stderr captured so far attached.
///
/// `diagnostics` hosts the stderr drain and must be rooted independently
/// of `scope`: cancelling the operational scope tears the process down,
/// while the drain keeps reading trailing stderr until the pipe closes.
///
/// # Errors
///
/// Returns [`BootstrapError`] when any deployment step or the RPC
/// handshake fails.
pub async fn bootstrap_session(
    config: &RuntimeConfig,
    resolver: &dyn BinaryResolver,
    options: AgentLaunchOptions,
    connector: &dyn Connector,
    mut shell: Child,
    id: SessionId,
    scope: Scope,
    diagnostics: Scope,
) -> Result<(Session, BootstrapOutcome, ProcessSupervisor), BootstrapError> {
    let Some(mut stdin) = shell.stdin.take() else {
        return Err(BootstrapError::Io("shell stdin is not piped".to_owned()));
    };
    let Some(mut stdout) = shell.stdout.take() else {
        return Err(BootstrapError::Io("shell stdout is not piped".to_owned()));
    };

    let supervisor =
        ProcessSupervisor::launch(&scope, &diagnostics, shell, id.clone(), &config.supervisor);

    let handshake_scope = scope.clone();
    let result = supervisor
        .attach_recent_stderr(async {
            let outcome =
                deploy_over(config, resolver, &options, &mut stdout, &mut stdin).await?;
            let stdio = AgentStdio {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
            };
            let rpc = connector
                .connect(stdio, handshake_scope)
                .await
                .map_err(BootstrapError::Handshake)?;
            Ok::<_, BootstrapError>((outcome, rpc))
        })
        .await;

    match result {
        Ok((outcome, rpc)) => {
            let capability = capability_for(outcome.platform, Arc::clone(&rpc), scope.clone());
            let session = Session::new(id, capability, scope);
            info!(session_id = %session.id(), remote_path = %outcome.remote_path, "session established");
            Ok((session, outcome, supervisor))
        }
        Err(err) => {
            warn!(session_id = %id, %err, "bootstrap failed, destroying shell");
            scope.cancel();
            Err(err)
        }
    }
}

fn capability_for(platform: TargetPlatform, rpc: Arc<dyn AgentRpc>, scope: Scope) -> Capability {
    match platform {
        TargetPlatform::X86_64Linux | TargetPlatform::Aarch64Linux => {
            Capability::posix(rpc, scope)
        }
    }
}
