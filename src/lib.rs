#![forbid(unsafe_code)]

//! `agent-uplink` — client-side runtime for remote agent sessions.
//!
//! The crate deploys a small agent binary onto a (possibly remote or
//! containerized) machine, establishes a bidirectional RPC session with it
//! over the agent process's stdio, supervises the process's lifetime, and
//! exposes typed child-process and socket-tunnel primitives on top of the
//! session:
//!
//! - [`registry::SessionRegistry`] — keyed table of lazily-constructed,
//!   auto-recreated sessions.
//! - [`supervisor::ProcessSupervisor`] — stderr draining, exit
//!   classification, graceful-then-forceful teardown.
//! - [`remote::process::RemoteProcess`] — IPC handle for a process started
//!   *through* the agent.
//! - [`remote::tunnel`] — outbound TCP dialing and single-shot Unix-socket
//!   accepting on the remote machine.
//! - [`bootstrap`] — turns a bare POSIX shell into a running, connected
//!   agent when no pre-installed binary is available.
//!
//! The RPC transport itself is an external collaborator consumed through
//! the [`rpc::AgentRpc`] and [`rpc::Connector`] seams.

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod registry;
pub mod remote;
pub mod rpc;
pub mod scope;
pub mod session;
pub mod supervisor;

pub use config::RuntimeConfig;
pub use errors::{Result, SessionError};
pub use session::{Session, SessionId};
