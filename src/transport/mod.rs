//! Transport Module
//!
//! The cluster core talks to its peers only through the [`Transport`] trait:
//! point-to-point sends, a broadcast used by discovery, and an inbound
//! stream drained by the node's receive loop. Messages are converted to
//! bytes by an explicitly passed [`codec::Codec`].
//!
//! ## Implementations
//! - **`udp`**: tokio UDP socket, one datagram per message.
//! - **`memory`**: in-process hub with fault injection, used by tests and by
//!   applications embedding several nodes in one process.

pub mod codec;
pub mod memory;
pub mod protocol;
pub mod udp;


use crate::error::TransportError;
use async_trait::async_trait;
use codec::Codec;
use protocol::ClusterMessage;
use std::net::SocketAddr;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Address peers use to reach this node. Doubles as the member identity.
    fn local_addr(&self) -> SocketAddr;

    /// Delivers `message` to a single peer.
    ///
    /// `Ok` means the message left this node; it does not mean the peer
    /// processed it. Acknowledgment is a protocol-level concern.
    async fn send_to(&self, addr: SocketAddr, message: &ClusterMessage)
    -> Result<(), TransportError>;

    /// Sends `message` to every discovery-reachable address and returns how
    /// many targets it was handed to.
    async fn broadcast(&self, message: &ClusterMessage) -> Result<usize, TransportError>;

    /// Waits for the next inbound message.
    async fn recv(&self) -> Result<(SocketAddr, ClusterMessage), TransportError>;

    /// Encodes `message` without sending it and checks it against the
    /// transport's size limit. Returns the encoded size.
    fn check_outbound(&self, message: &ClusterMessage) -> Result<usize, TransportError>;
}

/// Encodes `message`, refusing results larger than `limit`.
pub(crate) fn encode_within(
    codec: &dyn Codec,
    message: &ClusterMessage,
    limit: Option<usize>,
) -> Result<Vec<u8>, TransportError> {
    let encoded = codec.encode(message)?;
    match limit {
        Some(limit) if encoded.len() > limit => Err(TransportError::MessageTooLarge {
            size: encoded.len(),
            limit,
        }),
        _ => Ok(encoded),
    }
}
