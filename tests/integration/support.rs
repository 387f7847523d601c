//! Shared integration fixtures: transport and handshake stubs.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use agent_uplink::errors::{
    DialError, ListenError, ResizePtyError, Result, SendStdinError, SpawnError, StreamError,
};
use agent_uplink::remote::tunnel::HostAddress;
use agent_uplink::rpc::{
    AgentRpc, AgentStdio, ConnectionId, Connector, PtySize, Signal, SocketOption, SpawnSpec,
    SpawnedProcess, TunnelStreams,
};
use agent_uplink::scope::Scope;

/// Transport stub for lifecycle tests that never issue remote calls.
pub struct NullRpc;

impl AgentRpc for NullRpc {
    fn spawn_process(
        &self,
        _spec: SpawnSpec,
    ) -> Pin<Box<dyn Future<Output = Result<SpawnedProcess, SpawnError>> + Send + '_>> {
        Box::pin(async { Err(SpawnError::Failure("transport stub".to_owned())) })
    }

    fn send_stdin(
        &self,
        _pid: u32,
        _chunk: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendStdinError>> + Send + '_>> {
        Box::pin(async { Err(SendStdinError::StdinClosed) })
    }

    fn send_signal(
        &self,
        _pid: u32,
        _signal: Signal,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn resize_pty(
        &self,
        _pid: u32,
        _size: PtySize,
    ) -> Pin<Box<dyn Future<Output = Result<(), ResizePtyError>> + Send + '_>> {
        Box::pin(async { Err(ResizePtyError::NoPty) })
    }

    fn dial(
        &self,
        _address: HostAddress,
    ) -> Pin<Box<dyn Future<Output = Result<TunnelStreams, DialError>> + Send + '_>> {
        Box::pin(async { Err(DialError::UnknownFailure("transport stub".to_owned())) })
    }

    fn set_socket_option(
        &self,
        _id: ConnectionId,
        _option: SocketOption,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async { Err(StreamError::ConnectionAborted) })
    }

    fn close_connection(&self, _id: ConnectionId) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }

    fn listen_unix_socket(
        &self,
        _path: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<(String, TunnelStreams), ListenError>> + Send + '_>>
    {
        Box::pin(async { Err(ListenError::Bind("transport stub".to_owned())) })
    }
}

/// Handshake stub that accepts any stdio pair and hands back a [`NullRpc`].
pub struct NullConnector;

impl Connector for NullConnector {
    fn connect(
        &self,
        _stdio: AgentStdio,
        _scope: Scope,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn AgentRpc>>> + Send + '_>> {
        Box::pin(async { Ok(Arc::new(NullRpc) as Arc<dyn AgentRpc>) })
    }
}
