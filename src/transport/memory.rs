//! In-process transport.
//!
//! `MemoryNetwork` is a hub that routes encoded messages between endpoints
//! registered under socket addresses. Faults are injected per address:
//! a disconnected endpoint can neither send nor receive, which is how tests
//! simulate a crashed node.

use super::codec::{BincodeCodec, Codec};
use super::{Transport, encode_within};
use super::protocol::ClusterMessage;
use crate::error::TransportError;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

type Datagram = (SocketAddr, Vec<u8>);

pub struct MemoryNetwork {
    endpoints: DashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    down: DashSet<SocketAddr>,
    codec: Arc<dyn Codec>,
    max_message_size: Option<usize>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_codec(Arc::new(BincodeCodec))
    }

    pub fn with_codec(codec: Arc<dyn Codec>) -> Arc<Self> {
        Arc::new(Self {
            endpoints: DashMap::new(),
            down: DashSet::new(),
            codec,
            max_message_size: None,
        })
    }

    /// A bincode network that refuses messages above `limit` bytes, the
    /// way a datagram transport does.
    pub fn with_max_message_size(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            endpoints: DashMap::new(),
            down: DashSet::new(),
            codec: Arc::new(BincodeCodec),
            max_message_size: Some(limit),
        })
    }

    fn encode(&self, message: &ClusterMessage) -> Result<Vec<u8>, TransportError> {
        encode_within(self.codec.as_ref(), message, self.max_message_size)
    }

    /// Registers an endpoint at `addr`, replacing any previous one.
    pub fn endpoint(self: &Arc<Self>, addr: SocketAddr) -> Arc<MemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.insert(addr, tx);
        self.down.remove(&addr);

        Arc::new(MemoryTransport {
            local_addr: addr,
            network: self.clone(),
            inbox: Mutex::new(rx),
        })
    }

    /// Simulates a crash of `addr`: sends to and from it fail.
    pub fn disconnect(&self, addr: SocketAddr) {
        tracing::debug!("Memory network: {} disconnected", addr);
        self.down.insert(addr);
    }

    pub fn reconnect(&self, addr: SocketAddr) {
        tracing::debug!("Memory network: {} reconnected", addr);
        self.down.remove(&addr);
    }

    pub fn is_down(&self, addr: &SocketAddr) -> bool {
        self.down.contains(addr)
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.endpoints.iter().map(|entry| *entry.key()).collect()
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.is_down(&from) {
            return Err(TransportError::Closed);
        }
        if self.is_down(&to) {
            return Err(TransportError::Unreachable(to));
        }

        let sender = self
            .endpoints
            .get(&to)
            .ok_or(TransportError::Unreachable(to))?;

        sender
            .send((from, bytes))
            .map_err(|_| TransportError::Unreachable(to))
    }
}

pub struct MemoryTransport {
    local_addr: SocketAddr,
    network: Arc<MemoryNetwork>,
    inbox: Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(
        &self,
        addr: SocketAddr,
        message: &ClusterMessage,
    ) -> Result<(), TransportError> {
        let encoded = self.network.encode(message)?;
        self.network.deliver(self.local_addr, addr, encoded)
    }

    /// Reaches every other registered endpoint, like a LAN multicast group.
    async fn broadcast(&self, message: &ClusterMessage) -> Result<usize, TransportError> {
        if self.network.is_down(&self.local_addr) {
            return Err(TransportError::Closed);
        }

        let encoded = self.network.encode(message)?;
        let mut reached = 0;
        for addr in self.network.addresses() {
            if addr == self.local_addr {
                continue;
            }
            if self
                .network
                .deliver(self.local_addr, addr, encoded.clone())
                .is_ok()
            {
                reached += 1;
            }
        }

        Ok(reached)
    }

    async fn recv(&self) -> Result<(SocketAddr, ClusterMessage), TransportError> {
        let mut inbox = self.inbox.lock().await;

        loop {
            let (from, bytes) = inbox.recv().await.ok_or(TransportError::Closed)?;

            // A crashed node does not process what was already in flight.
            if self.network.is_down(&self.local_addr) {
                continue;
            }

            let message = self.network.codec.decode(&bytes)?;
            return Ok((from, message));
        }
    }

    fn check_outbound(&self, message: &ClusterMessage) -> Result<usize, TransportError> {
        self.network.encode(message).map(|bytes| bytes.len())
    }
}
