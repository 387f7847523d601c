//! Remote process handle behavior against a scriptable transport.

use std::sync::Arc;

use bytes::Bytes;

use agent_uplink::errors::{SendStdinError, SessionError, SpawnError};
use agent_uplink::remote::{Capability, Platform};
use agent_uplink::rpc::{Signal, SpawnSpec};
use agent_uplink::scope::Scope;

use super::support::{fake_process, FakeAgentRpc};

fn posix_capability(rpc: Arc<FakeAgentRpc>) -> (Capability, Scope) {
    let scope = Scope::new();
    (Capability::posix(rpc, scope.clone()), scope)
}

/// Spawning yields a handle exposing the agent-reported pid.
#[tokio::test]
async fn spawn_exposes_pid() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(4242);
    rpc.queue_spawn(Ok(spawned));
    let (capability, _scope) = posix_capability(rpc);

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/cat"))
        .await
        .expect("spawn");
    assert_eq!(process.pid(), 4242);
}

/// A rejected spawn surfaces the agent's failure reason.
#[tokio::test]
async fn spawn_failure_propagates() {
    let rpc = Arc::new(FakeAgentRpc::new());
    rpc.queue_spawn(Err(SpawnError::Failure("no such file".to_owned())));
    let (capability, _scope) = posix_capability(rpc);

    let err = capability
        .spawn_process(SpawnSpec::new("/missing"))
        .await
        .expect_err("spawn must fail");
    assert!(matches!(err, SpawnError::Failure(_)));
}

/// Unconfirmed stdin chunks arrive individually and in submission order.
#[tokio::test]
async fn stdin_sink_preserves_chunk_order() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, mut driver) = fake_process(1);
    rpc.queue_spawn(Ok(spawned));
    let (capability, _scope) = posix_capability(rpc);

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/cat"))
        .await
        .expect("spawn");
    let stdin = process.stdin();
    stdin.send(Bytes::from_static(b"alpha")).await.expect("send");
    stdin.send(Bytes::from_static(b"beta")).await.expect("send");
    stdin.send(Bytes::from_static(b"gamma")).await.expect("send");

    assert_eq!(driver.stdin_rx.recv().await.unwrap(), "alpha");
    assert_eq!(driver.stdin_rx.recv().await.unwrap(), "beta");
    assert_eq!(driver.stdin_rx.recv().await.unwrap(), "gamma");
}

/// The unconfirmed sink reports stdin closure once the far side is gone.
#[tokio::test]
async fn stdin_sink_reports_closure() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, driver) = fake_process(1);
    rpc.queue_spawn(Ok(spawned));
    let (capability, _scope) = posix_capability(rpc);

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/cat"))
        .await
        .expect("spawn");
    drop(driver.stdin_rx);

    let err = process
        .stdin()
        .send(Bytes::from_static(b"late"))
        .await
        .expect_err("closed sink must fail");
    assert!(matches!(err, SendStdinError::StdinClosed));
}

/// Confirmed delivery resolves only through the acknowledging call.
#[tokio::test]
async fn confirmed_stdin_round_trips() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(9);
    rpc.queue_spawn(Ok(spawned));
    let (capability, _scope) = posix_capability(Arc::clone(&rpc));

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/cat"))
        .await
        .expect("spawn");
    process
        .send_stdin_with_confirmation(Bytes::from_static(b"ack me"))
        .await
        .expect("confirmed send");

    let delivered = rpc.confirmed_stdin.lock().unwrap().clone();
    assert_eq!(delivered, vec![(9, Bytes::from_static(b"ack me"))]);
}

/// A process-exited rejection comes back as the typed per-call error.
#[tokio::test]
async fn confirmed_stdin_process_exited() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(9);
    rpc.queue_spawn(Ok(spawned));
    *rpc.stdin_error.lock().unwrap() = Some(SendStdinError::ProcessExited);
    let (capability, _scope) = posix_capability(Arc::clone(&rpc));

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/cat"))
        .await
        .expect("spawn");
    let err = process
        .send_stdin_with_confirmation(Bytes::from_static(b"x"))
        .await
        .expect_err("must surface process exit");
    assert!(matches!(err, SendStdinError::ProcessExited));
}

/// Stdin closed without the process exiting is its own confirmed-send error.
#[tokio::test]
async fn confirmed_stdin_closed_without_exit() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(9);
    rpc.queue_spawn(Ok(spawned));
    *rpc.stdin_error.lock().unwrap() = Some(SendStdinError::StdinClosed);
    let (capability, _scope) = posix_capability(Arc::clone(&rpc));

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/cat"))
        .await
        .expect("spawn");
    let err = process
        .send_stdin_with_confirmation(Bytes::from_static(b"x"))
        .await
        .expect_err("must surface stdin closure");
    assert!(matches!(err, SendStdinError::StdinClosed));
}

/// The exit future resolves with the agent-reported code.
#[tokio::test]
async fn exit_code_resolves_once() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, driver) = fake_process(7);
    rpc.queue_spawn(Ok(spawned));
    let (capability, _scope) = posix_capability(rpc);

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/true"))
        .await
        .expect("spawn");
    driver.exit_tx.send(0).expect("deliver exit");

    assert_eq!(process.exit_code().await.expect("exit"), 0);
    // A second await on the shared future sees the same resolution.
    assert_eq!(process.exit_code().await.expect("exit"), 0);
}

/// Session breakage fails a pending exit wait with the breakage cause.
#[tokio::test]
async fn exit_wait_fails_when_session_breaks() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(7);
    rpc.queue_spawn(Ok(spawned));
    let (capability, scope) = posix_capability(rpc);

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/sleep"))
        .await
        .expect("spawn");
    scope.cancel_with(SessionError::communication("transport torn"));

    let err = process.exit_code().await.expect_err("must fail");
    assert!(err.to_string().contains("transport torn"));
}

/// POSIX signal methods map to the three signal selectors.
#[tokio::test]
async fn posix_signals_map_directly() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(7);
    rpc.queue_spawn(Ok(spawned));
    let (capability, _scope) = posix_capability(Arc::clone(&rpc));

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/sleep"))
        .await
        .expect("spawn");
    process.interrupt().await.expect("interrupt");
    process.terminate().await.expect("terminate");
    process.kill().await.expect("kill");

    let signals = rpc.signals.lock().unwrap().clone();
    assert_eq!(
        signals,
        vec![
            (7, Signal::Interrupt),
            (7, Signal::Terminate),
            (7, Signal::Kill)
        ]
    );
}

/// On Windows, interrupt is a successful no-op and terminate kills.
#[tokio::test]
async fn windows_signal_semantics() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(7);
    rpc.queue_spawn(Ok(spawned));
    let scope = Scope::new();
    let capability = Capability::windows(rpc.clone(), scope);
    assert_eq!(capability.platform(), Platform::Windows);

    let process = capability
        .spawn_process(SpawnSpec::new("agent.exe"))
        .await
        .expect("spawn");
    process.interrupt().await.expect("no-op interrupt");
    process.terminate().await.expect("terminate");

    let signals = rpc.signals.lock().unwrap().clone();
    assert_eq!(signals, vec![(7, Signal::Kill)]);
}

/// Pty resizes forward the requested dimensions.
#[tokio::test]
async fn resize_forwards_dimensions() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (spawned, _driver) = fake_process(3);
    rpc.queue_spawn(Ok(spawned));
    let (capability, _scope) = posix_capability(Arc::clone(&rpc));

    let process = capability
        .spawn_process(SpawnSpec::new("/bin/sh"))
        .await
        .expect("spawn");
    process.resize_pty(120, 40).await.expect("resize");

    let resizes = rpc.resizes.lock().unwrap().clone();
    assert_eq!(resizes.len(), 1);
    assert_eq!(resizes[0].0, 3);
    assert_eq!(resizes[0].1.columns, 120);
    assert_eq!(resizes[0].1.rows, 40);
}

/// Calls on an already-broken session fail fast with the session cause.
#[tokio::test]
async fn calls_on_broken_session_fail_fast() {
    let rpc = Arc::new(FakeAgentRpc::new());
    let (capability, scope) = posix_capability(rpc);
    scope.cancel_with(SessionError::communication("gone"));

    let err = capability
        .spawn_process(SpawnSpec::new("/bin/true"))
        .await
        .expect_err("broken session must refuse calls");
    assert!(matches!(err, SpawnError::SessionDown(_)));
}
