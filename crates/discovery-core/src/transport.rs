//! Datagram transport seam.
//!
//! The discovery loops only talk to the network through `DatagramTransport`,
//! so the daemon plugs in a tokio UDP socket and tests can plug in anything
//! that moves datagrams.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    #[error("Failed to enable broadcast: {0}")]
    Broadcast(String),

    #[error("Send to {target} failed: {reason}")]
    Send { target: SocketAddr, reason: String },

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A bound, connectionless socket.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Address the socket ended up bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Allow sending to broadcast addresses.
    fn enable_broadcast(&self) -> Result<()>;

    /// Send one datagram. Returns the number of bytes sent.
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize>;

    /// Wait up to `timeout` for one datagram.
    ///
    /// Returns `Ok(None)` when the timeout elapses. A datagram larger than
    /// `buf` is truncated to `buf.len()`.
    async fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddr)>>;
}

/// Creates bound transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn bind(&self, addr: SocketAddr) -> Result<Arc<dyn DatagramTransport>>;
}
