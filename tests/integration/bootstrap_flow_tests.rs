//! Deployment protocol exercised against a scripted in-memory shell.

use std::fs;
use std::process::Stdio;

use tokio::io::{split, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf};
use tokio::process::Command;

use agent_uplink::bootstrap::platform::{DirectoryResolver, TargetPlatform};
use agent_uplink::bootstrap::script::AgentLaunchOptions;
use agent_uplink::bootstrap::{bootstrap_session, deploy_over, BootstrapOutcome};
use agent_uplink::config::RuntimeConfig;
use agent_uplink::errors::BootstrapError;
use agent_uplink::scope::Scope;
use agent_uplink::session::SessionId;

use super::support::NullConnector;

const AGENT_BYTES: &[u8] = b"\x7fELF-stand-in agent binary payload";

/// Temp directory holding a fake agent binary for the given target.
fn resolver_with_binary(target: &str) -> (tempfile::TempDir, DirectoryResolver) {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(format!("uplink-agent-{target}")), AGENT_BYTES).expect("binary");
    let resolver = DirectoryResolver::new(dir.path(), "uplink-agent");
    (dir, resolver)
}

struct ScriptedShell {
    reader: BufReader<ReadHalf<tokio::io::DuplexStream>>,
    writer: WriteHalf<tokio::io::DuplexStream>,
}

impl ScriptedShell {
    fn new(stream: tokio::io::DuplexStream) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn read_command(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.expect("read command");
        line
    }

    async fn write(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.expect("write");
        self.writer.flush().await.expect("flush");
    }
}

/// Full happy path: banner noise, probe, upload with exact byte count,
/// launch.
#[tokio::test]
async fn full_deployment_protocol() {
    let config = RuntimeConfig::default();
    let (_dir, resolver) = resolver_with_binary("x86_64-linux");
    let (client_end, shell_end) = tokio::io::duplex(64 * 1024);

    let shell = tokio::spawn(async move {
        let mut shell = ScriptedShell::new(shell_end);

        let probe = shell.read_command().await;
        let boundary = probe
            .strip_prefix("echo ")
            .and_then(|rest| rest.split(';').next())
            .expect("probe carries the boundary")
            .trim()
            .to_owned();
        assert_eq!(boundary.len(), 32, "uuid-simple boundary");
        assert!(probe.contains("uname -pm"), "{probe}");

        // Login banners precede the boundary and must be skipped.
        shell.write("Welcome to fakehost!\r\n").await;
        shell.write("Last login: yesterday\n").await;
        shell.write(&format!("{boundary}\r\n")).await;
        shell.write("x86_64 x86_64\n").await;

        let upload = shell.read_command().await;
        assert!(upload.contains("mktemp -d"), "{upload}");
        assert!(upload.contains("chmod 500"), "{upload}");
        let count: usize = upload
            .split("head -c ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .expect("byte count")
            .parse()
            .expect("numeric byte count");
        assert_eq!(count, AGENT_BYTES.len());

        let mut binary = vec![0_u8; count];
        shell
            .reader
            .read_exact(&mut binary)
            .await
            .expect("binary payload");
        assert_eq!(binary, AGENT_BYTES, "payload must arrive byte-exact");

        shell.write("/tmp/deploy.xyz/uplink-agent\n").await;

        let launch = shell.read_command().await;
        assert!(launch.starts_with("cd '/tmp/deploy.xyz';"), "{launch}");
        assert!(launch.contains("exec"), "{launch}");
        assert!(launch.contains("getent passwd"), "{launch}");
        assert!(launch.contains("grpc-server"), "{launch}");
        assert!(launch.contains("/tmp/deploy.xyz/uplink-agent"), "{launch}");
    });

    let (mut reader, mut writer) = split(client_end);
    let outcome = deploy_over(
        &config,
        &resolver,
        &AgentLaunchOptions::new(),
        &mut reader,
        &mut writer,
    )
    .await
    .expect("deployment");

    assert_eq!(
        outcome,
        BootstrapOutcome {
            platform: TargetPlatform::X86_64Linux,
            remote_path: "/tmp/deploy.xyz/uplink-agent".to_owned(),
        }
    );
    shell.await.expect("scripted shell");
}

/// Launch flags appear in the rendered command when options request them.
#[tokio::test]
async fn launch_flags_follow_options() {
    let config = RuntimeConfig::default();
    let (_dir, resolver) = resolver_with_binary("aarch64-linux");
    let (client_end, shell_end) = tokio::io::duplex(64 * 1024);

    let shell = tokio::spawn(async move {
        let mut shell = ScriptedShell::new(shell_end);
        let probe = shell.read_command().await;
        let boundary = probe
            .strip_prefix("echo ")
            .and_then(|rest| rest.split(';').next())
            .expect("boundary")
            .trim()
            .to_owned();
        shell.write(&format!("{boundary}\n")).await;
        shell.write("arm64\n").await;

        let upload = shell.read_command().await;
        let count: usize = upload
            .split("head -c ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .expect("byte count")
            .parse()
            .expect("numeric");
        let mut binary = vec![0_u8; count];
        shell.reader.read_exact(&mut binary).await.expect("payload");
        shell.write("/tmp/d/uplink-agent\n").await;

        let launch = shell.read_command().await;
        assert!(launch.contains("--self-delete-on-exit"), "{launch}");
        assert!(launch.contains("--no-shutdown-on-disconnect"), "{launch}");
        assert!(launch.contains("RUST_LOG=info"), "{launch}");
    });

    let options = AgentLaunchOptions::new()
        .env("RUST_LOG", "info")
        .self_delete_on_exit()
        .no_shutdown_on_disconnect();
    let (mut reader, mut writer) = split(client_end);
    let outcome = deploy_over(&config, &resolver, &options, &mut reader, &mut writer)
        .await
        .expect("deployment");
    assert_eq!(outcome.platform, TargetPlatform::Aarch64Linux);
    shell.await.expect("scripted shell");
}

/// A silent shell trips the probe timeout.
#[tokio::test]
async fn silent_shell_times_out() {
    let config = RuntimeConfig::from_toml_str("[bootstrap]\nprobe_timeout_seconds = 1\n")
        .expect("config");
    let (_dir, resolver) = resolver_with_binary("x86_64-linux");
    let (client_end, _shell_end) = tokio::io::duplex(64 * 1024);

    let (mut reader, mut writer) = split(client_end);
    let err = deploy_over(
        &config,
        &resolver,
        &AgentLaunchOptions::new(),
        &mut reader,
        &mut writer,
    )
    .await
    .expect_err("must time out");
    assert_eq!(err, BootstrapError::ProbeTimeout);
}

/// A shell that hangs up mid-probe surfaces the shell-exited error.
#[tokio::test]
async fn closed_shell_is_reported() {
    let config = RuntimeConfig::default();
    let (_dir, resolver) = resolver_with_binary("x86_64-linux");
    let (client_end, shell_end) = tokio::io::duplex(64 * 1024);
    drop(shell_end);

    let (mut reader, mut writer) = split(client_end);
    let err = deploy_over(
        &config,
        &resolver,
        &AgentLaunchOptions::new(),
        &mut reader,
        &mut writer,
    )
    .await
    .expect_err("must fail");
    assert!(matches!(err, BootstrapError::ShellExited | BootstrapError::Io(_)));
}

/// An unsupported remote architecture aborts before any upload.
#[tokio::test]
async fn unsupported_architecture_aborts() {
    let config = RuntimeConfig::default();
    let (_dir, resolver) = resolver_with_binary("x86_64-linux");
    let (client_end, shell_end) = tokio::io::duplex(64 * 1024);

    let shell = tokio::spawn(async move {
        let mut shell = ScriptedShell::new(shell_end);
        let probe = shell.read_command().await;
        let boundary = probe
            .strip_prefix("echo ")
            .and_then(|rest| rest.split(';').next())
            .expect("boundary")
            .trim()
            .to_owned();
        shell.write(&format!("{boundary}\n")).await;
        shell.write("riscv64 riscv64\n").await;
    });

    let (mut reader, mut writer) = split(client_end);
    let err = deploy_over(
        &config,
        &resolver,
        &AgentLaunchOptions::new(),
        &mut reader,
        &mut writer,
    )
    .await
    .expect_err("must reject riscv64");
    assert!(matches!(err, BootstrapError::UnsupportedArchitecture(_)));
    shell.await.expect("scripted shell");
}

/// A failed bootstrap breaks the operational scope but leaves the
/// independently-rooted diagnostics scope alive, with the shell's stderr
/// attached to the reported error.
#[tokio::test]
async fn failed_bootstrap_spares_diagnostics_scope() {
    let config = RuntimeConfig::default();
    let (_dir, resolver) = resolver_with_binary("x86_64-linux");
    let shell = Command::new("/bin/sh")
        .arg("-c")
        .arg("echo 'permission denied' >&2; exit 1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn shell");

    let scope = Scope::new();
    let diagnostics = Scope::new();
    let err = bootstrap_session(
        &config,
        &resolver,
        AgentLaunchOptions::new(),
        &NullConnector,
        shell,
        SessionId::mint("doomed-bootstrap"),
        scope.clone(),
        diagnostics.clone(),
    )
    .await
    .expect_err("bootstrap must fail");

    assert!(matches!(
        err.root(),
        BootstrapError::ShellExited | BootstrapError::Io(_)
    ));
    assert!(err.to_string().contains("permission denied"), "{err}");
    assert!(scope.is_cancelled(), "failure tears the session scope down");
    assert!(
        !diagnostics.is_cancelled(),
        "diagnostics must survive teardown"
    );
}

/// A known architecture with no local binary is a resolver failure.
#[tokio::test]
async fn missing_binary_is_reported() {
    let config = RuntimeConfig::default();
    // Resolver root holds only the x86_64 binary; the shell reports arm.
    let (_dir, resolver) = resolver_with_binary("x86_64-linux");
    let (client_end, shell_end) = tokio::io::duplex(64 * 1024);

    let shell = tokio::spawn(async move {
        let mut shell = ScriptedShell::new(shell_end);
        let probe = shell.read_command().await;
        let boundary = probe
            .strip_prefix("echo ")
            .and_then(|rest| rest.split(';').next())
            .expect("boundary")
            .trim()
            .to_owned();
        shell.write(&format!("{boundary}\n")).await;
        shell.write("aarch64\n").await;
    });

    let (mut reader, mut writer) = split(client_end);
    let err = deploy_over(
        &config,
        &resolver,
        &AgentLaunchOptions::new(),
        &mut reader,
        &mut writer,
    )
    .await
    .expect_err("no arm binary available");
    match err {
        BootstrapError::MissingBinary { platform, .. } => {
            assert_eq!(platform, "aarch64-linux");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    shell.await.expect("scripted shell");
}
