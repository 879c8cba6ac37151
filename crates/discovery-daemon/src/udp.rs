//! UDP transport backed by `tokio::net::UdpSocket`.

use async_trait::async_trait;
use discovery_core::transport::{DatagramTransport, Result, TransportError, TransportFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr,
                reason: e.to_string(),
            })?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    fn enable_broadcast(&self) -> Result<()> {
        self.socket
            .set_broadcast(true)
            .map_err(|e| TransportError::Broadcast(e.to_string()))
    }

    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize> {
        self.socket
            .send_to(data, target)
            .await
            .map_err(|e| TransportError::Send {
                target,
                reason: e.to_string(),
            })
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(received)) => Ok(Some(received)),
            Ok(Err(e)) => Err(TransportError::Receive(e.to_string())),
        }
    }
}

/// Binds `UdpTransport`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransportFactory;

#[async_trait]
impl TransportFactory for UdpTransportFactory {
    async fn bind(&self, addr: SocketAddr) -> Result<Arc<dyn DatagramTransport>> {
        Ok(Arc::new(UdpTransport::bind(addr).await?))
    }
}
