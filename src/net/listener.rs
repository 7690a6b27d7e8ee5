//! TCP listener with keep-alive on every accepted connection.
//!
//! # Responsibilities
//! - Format and bind the configured address
//! - Accept incoming TCP connections
//! - Enable TCP keep-alive so dead peers are eventually reaped
//! - Survive transient accept errors instead of ending the serve loop

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};

use crate::observability::metrics;

/// Idle time before the first keep-alive probe.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(180);

/// Address used when no bind address is configured.
pub const UNSPECIFIED_ADDRESS: &str = "0.0.0.0";

/// Build `host:port`, bracketing literal IPv6 hosts.
///
/// An empty host binds every IPv4 interface.
pub fn format_bind_addr(address: &str, port: u16) -> String {
    if address.is_empty() {
        format!("{UNSPECIFIED_ADDRESS}:{port}")
    } else if address.contains(':') && !address.contains('[') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

/// A TCP listener whose accepted sockets have keep-alive enabled.
///
/// Accepts through [`axum::serve::Listener`], so it also plugs into `axum::serve`.
#[derive(Debug)]
pub struct KeepAliveListener {
    inner: TcpListener,
    name: String,
    keepalive: Duration,
}

impl KeepAliveListener {
    /// Bind `address` (`host:port`). `name` labels log lines and metrics.
    pub async fn bind(name: &str, address: &str) -> io::Result<Self> {
        let inner = TcpListener::bind(address).await?;
        Ok(Self::from_tcp(name, inner))
    }

    /// Wrap an already-bound listener.
    pub fn from_tcp(name: &str, inner: TcpListener) -> Self {
        Self {
            inner,
            name: name.to_string(),
            keepalive: KEEPALIVE_PERIOD,
        }
    }

    /// The address actually bound, with the OS-assigned port resolved.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn prepare(&self, stream: &TcpStream, peer: SocketAddr) {
        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            tracing::debug!(listener = %self.name, peer_addr = %peer, error = %e, "Failed to enable keep-alive");
        }
        metrics::record_connection_accepted(&self.name);
        tracing::trace!(listener = %self.name, peer_addr = %peer, "Connection accepted");
    }
}

impl axum::serve::Listener for KeepAliveListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, peer)) => {
                    self.prepare(&stream, peer);
                    return (stream, peer);
                }
                Err(e) if is_connection_error(&e) => {
                    tracing::debug!(listener = %self.name, error = %e, "Connection dropped before accept");
                }
                Err(e) => {
                    // Usually descriptor exhaustion; back off so the loop does not spin.
                    tracing::warn!(listener = %self.name, error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
