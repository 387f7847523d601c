//! End-to-end lifecycle: registry-managed sessions whose agent processes
//! are real supervised shell children.

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::process::Command;
use tokio::time::timeout;

use agent_uplink::config::SupervisorConfig;
use agent_uplink::errors::SessionError;
use agent_uplink::registry::{SessionFactory, SessionRegistry};
use agent_uplink::remote::Capability;
use agent_uplink::scope::Scope;
use agent_uplink::session::Session;
use agent_uplink::supervisor::ProcessSupervisor;

use super::support::NullRpc;

fn shell(script: &str) -> tokio::process::Child {
    Command::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn shell")
}

/// Factory whose first agent dies immediately and whose replacements live
/// until torn down.
fn supervised_factory(calls: Arc<AtomicUsize>) -> SessionFactory {
    Arc::new(move |id, scope| {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            let script = if attempt == 0 {
                "echo 'agent panicked' >&2; sleep 0.2; exit 7"
            } else {
                "sleep 600"
            };
            // Rooted independently of the session scope so teardown cannot
            // clip trailing stderr.
            let diagnostics = Scope::new();
            let _supervisor = ProcessSupervisor::launch(
                &scope,
                &diagnostics,
                shell(script),
                id.clone(),
                &SupervisorConfig {
                    shutdown_grace_seconds: 1,
                    ..SupervisorConfig::default()
                },
            );
            let capability = Capability::posix(Arc::new(NullRpc), scope.clone());
            Ok(Session::new(id, capability, scope))
        }
        .boxed()
    })
}

/// A crashing agent breaks the session; the next lookup rebuilds it; and
/// unregistering tears the replacement down.
#[tokio::test]
async fn crash_rebuild_and_teardown() {
    let registry = SessionRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = registry.register("lifecycle", supervised_factory(Arc::clone(&calls)));

    let doomed = registry.get(&id).await.expect("first session");
    timeout(Duration::from_secs(5), doomed.scope().cancelled())
        .await
        .expect("agent exit must break the session");
    assert!(!doomed.is_usable());
    let cause = doomed.failure().to_string();
    assert!(cause.contains("exited with code 7"), "{cause}");
    assert!(cause.contains("agent panicked"), "{cause}");

    let replacement = registry.get(&id).await.expect("rebuilt session");
    assert!(replacement.is_usable());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(registry.unregister(&id));
    assert!(!replacement.is_usable());
    assert_eq!(replacement.failure(), SessionError::ClosedByApplication);
    // Teardown reaps the supervised child.
    timeout(Duration::from_secs(10), replacement.scope().wait_idle())
        .await
        .expect("teardown must finish");
}

/// Closing a session directly has the same effect as unregistering it,
/// except the registry key survives and rebuilds on demand.
#[tokio::test]
async fn closed_session_is_rebuilt_on_next_get() {
    let registry = SessionRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = registry.register("close-then-get", supervised_factory(Arc::clone(&calls)));

    // Skip past the deliberately-crashing first attempt.
    let first = registry.get(&id).await.expect("first");
    timeout(Duration::from_secs(5), first.scope().cancelled())
        .await
        .expect("first agent exits");

    let session = registry.get(&id).await.expect("stable session");
    session.close();
    assert!(!session.is_usable());
    timeout(Duration::from_secs(10), session.scope().wait_idle())
        .await
        .expect("teardown");

    let rebuilt = registry.get(&id).await.expect("rebuilt");
    assert!(rebuilt.is_usable());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    registry.unregister_all();
}
