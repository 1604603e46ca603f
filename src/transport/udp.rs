use super::codec::Codec;
use super::{Transport, encode_within};
use super::protocol::ClusterMessage;
use crate::error::TransportError;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 65_536;

/// Largest UDP payload over IPv4.
pub const MAX_PAYLOAD: usize = 65_507;

/// Datagram transport over a single UDP socket.
///
/// Every message is sent from the bound socket, so the source address a
/// peer observes is the same address the node is registered under.
/// Broadcast reaches the configured discovery targets only.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    codec: Arc<dyn Codec>,
    discovery_targets: RwLock<Vec<SocketAddr>>,
}

impl UdpTransport {
    pub async fn bind(
        bind_addr: SocketAddr,
        codec: Arc<dyn Codec>,
        discovery_targets: Vec<SocketAddr>,
    ) -> Result<Arc<Self>, TransportError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;

        tracing::info!(
            "UDP transport bound to {} (codec={}, {} discovery target(s))",
            local_addr,
            codec.name(),
            discovery_targets.len()
        );

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            local_addr,
            codec,
            discovery_targets: RwLock::new(discovery_targets),
        }))
    }

    pub fn add_discovery_target(&self, addr: SocketAddr) {
        let mut targets = self.discovery_targets.write();
        if addr != self.local_addr && !targets.contains(&addr) {
            targets.push(addr);
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(
        &self,
        addr: SocketAddr,
        message: &ClusterMessage,
    ) -> Result<(), TransportError> {
        let encoded = encode_within(self.codec.as_ref(), message, Some(MAX_PAYLOAD))?;
        self.socket.send_to(&encoded, addr).await?;
        tracing::trace!("Sent {} to {}", message.kind(), addr);
        Ok(())
    }

    async fn broadcast(&self, message: &ClusterMessage) -> Result<usize, TransportError> {
        let encoded = encode_within(self.codec.as_ref(), message, Some(MAX_PAYLOAD))?;
        let targets = self.discovery_targets.read().clone();

        let mut reached = 0;
        for target in targets {
            match self.socket.send_to(&encoded, target).await {
                Ok(_) => reached += 1,
                Err(e) => tracing::warn!("Failed to broadcast {} to {}: {}", message.kind(), target, e),
            }
        }

        Ok(reached)
    }

    async fn recv(&self) -> Result<(SocketAddr, ClusterMessage), TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, src) = self.socket.recv_from(&mut buf).await?;
        let message = self.codec.decode(&buf[..len])?;
        Ok((src, message))
    }

    fn check_outbound(&self, message: &ClusterMessage) -> Result<usize, TransportError> {
        encode_within(self.codec.as_ref(), message, Some(MAX_PAYLOAD)).map(|bytes| bytes.len())
    }
}
