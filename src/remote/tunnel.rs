//! Socket tunnels: dial out from the remote machine, or accept a Unix
//! domain socket connection on it, and shuttle bytes over the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{DialError, ListenError, Result, StreamError};
use crate::remote::SessionHandle;
use crate::rpc::{ConnectionId, SocketOption, TunnelStreams};

// ── Dial targets ────────────────────────────────────────────────────────

/// Address-family preference for resolving a dial target's hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpPreference {
    /// Whatever the remote OS resolver prefers.
    #[default]
    OsDefault,
    /// Prefer IPv4 results.
    V4,
    /// Prefer IPv6 results.
    V6,
}

/// A dial target as seen from the remote machine. Immutable; built through
/// [`HostAddressBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    host: String,
    port: u16,
    preference: IpPreference,
}

impl HostAddress {
    /// Hostname or literal address, resolved on the remote machine.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address-family preference.
    #[must_use]
    pub fn preference(&self) -> IpPreference {
        self.preference
    }
}

/// Builder for [`HostAddress`].
#[derive(Debug, Clone)]
pub struct HostAddressBuilder {
    host: String,
    port: u16,
    preference: IpPreference,
}

impl HostAddressBuilder {
    pub(crate) fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            preference: IpPreference::OsDefault,
        }
    }

    /// Prefer IPv4 when the hostname resolves to both families.
    #[must_use]
    pub fn prefer_v4(mut self) -> Self {
        self.preference = IpPreference::V4;
        self
    }

    /// Prefer IPv6 when the hostname resolves to both families.
    #[must_use]
    pub fn prefer_v6(mut self) -> Self {
        self.preference = IpPreference::V6;
        self
    }

    /// Defer to the remote OS resolver order.
    #[must_use]
    pub fn os_default(mut self) -> Self {
        self.preference = IpPreference::OsDefault;
        self
    }

    /// Finish the builder.
    #[must_use]
    pub fn build(self) -> HostAddress {
        HostAddress {
            host: self.host,
            port: self.port,
            preference: self.preference,
        }
    }
}

// ── Established connections ─────────────────────────────────────────────

/// One established tunnel connection (dialed or accepted).
#[derive(Debug)]
pub struct TunnelConnection {
    id: ConnectionId,
    handle: SessionHandle,
    outbound: mpsc::Sender<Bytes>,
    inbound: Option<mpsc::Receiver<Result<Bytes, StreamError>>>,
    closed: AtomicBool,
    closed_signal: CancellationToken,
}

impl TunnelConnection {
    fn new(handle: SessionHandle, streams: TunnelStreams) -> Self {
        Self {
            id: streams.id,
            handle,
            outbound: streams.outbound,
            inbound: Some(streams.inbound),
            closed: AtomicBool::new(false),
            closed_signal: CancellationToken::new(),
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send one chunk to the remote socket.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionAborted`] once the connection has
    /// been closed from either side.
    pub async fn send(&self, chunk: Bytes) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::ConnectionAborted);
        }
        if self.outbound.send(chunk).await.is_err() {
            // The outbound channel only drops once the remote socket is gone.
            self.closed_signal.cancel();
            return Err(StreamError::ConnectionAborted);
        }
        Ok(())
    }

    /// Take ownership of the receive side. A clean remote close ends the
    /// channel; resets and aborts deliver an `Err` item first.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<Result<Bytes, StreamError>>> {
        self.inbound.take()
    }

    /// Whether [`TunnelConnection::close`] has run on this handle.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection is over for any reason: a local
    /// [`TunnelConnection::close`], the remote socket observed gone, or the
    /// owning session breaking.
    pub async fn closed(&self) {
        tokio::select! {
            () = self.closed_signal.cancelled() => {}
            () = self.handle.scope.cancelled() => {}
        }
    }

    /// `SO_SNDBUF`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection is gone.
    pub async fn set_send_buffer_size(&self, bytes: u32) -> Result<(), StreamError> {
        self.set_option(SocketOption::SendBufferSize(bytes)).await
    }

    /// `SO_RCVBUF`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection is gone.
    pub async fn set_receive_buffer_size(&self, bytes: u32) -> Result<(), StreamError> {
        self.set_option(SocketOption::ReceiveBufferSize(bytes)).await
    }

    /// `SO_KEEPALIVE`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection is gone.
    pub async fn set_keep_alive(&self, enabled: bool) -> Result<(), StreamError> {
        self.set_option(SocketOption::KeepAlive(enabled)).await
    }

    /// `SO_REUSEADDR`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection is gone.
    pub async fn set_reuse_addr(&self, enabled: bool) -> Result<(), StreamError> {
        self.set_option(SocketOption::ReuseAddr(enabled)).await
    }

    /// `SO_LINGER`; `None` disables lingering.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection is gone.
    pub async fn set_linger(&self, timeout: Option<Duration>) -> Result<(), StreamError> {
        self.set_option(SocketOption::Linger(timeout)).await
    }

    /// `TCP_NODELAY`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection is gone.
    pub async fn set_no_delay(&self, enabled: bool) -> Result<(), StreamError> {
        self.set_option(SocketOption::NoDelay(enabled)).await
    }

    /// Close the remote socket. Idempotent; a second call is a no-op, and
    /// a close after the session broke silently does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed_signal.cancel();
        if self.handle.scope.is_cancelled() {
            return;
        }
        let rpc = self.handle.rpc.clone();
        tokio::select! {
            () = rpc.close_connection(self.id) => {}
            () = self.handle.scope.cancelled() => {}
        }
        debug!(connection = self.id.0, "tunnel connection closed");
    }

    async fn set_option(&self, option: SocketOption) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::ConnectionAborted);
        }
        let rpc = self.handle.rpc.clone();
        self.handle
            .guard(rpc.set_socket_option(self.id, option), |_| {
                StreamError::ConnectionAborted
            })
            .await
    }
}

// ── Session-level entry points ──────────────────────────────────────────

/// Dial `address` from the remote machine.
pub(crate) async fn dial(
    handle: &SessionHandle,
    address: HostAddress,
) -> Result<TunnelConnection, DialError> {
    let rpc = handle.rpc.clone();
    let streams = handle
        .guard(rpc.dial(address), DialError::SessionDown)
        .await?;
    debug!(connection = streams.id.0, "dialed remote port");
    Ok(TunnelConnection::new(handle.clone(), streams))
}

/// Accept one connection on a remote Unix domain socket.
pub(crate) async fn listen_unix(
    handle: &SessionHandle,
    path: Option<String>,
) -> Result<(String, TunnelConnection), ListenError> {
    let rpc = handle.rpc.clone();
    let (bound_path, streams) = handle
        .guard(rpc.listen_unix_socket(path), ListenError::SessionDown)
        .await?;
    debug!(
        connection = streams.id.0,
        path = %bound_path,
        "accepted unix socket connection"
    );
    Ok((bound_path, TunnelConnection::new(handle.clone(), streams)))
}
