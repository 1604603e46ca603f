//! Error types for cluster coordination.
//!
//! Transport-level failures are absorbed by the dispatcher and turned into
//! membership changes; only the terminal outcome of a submission reaches the
//! embedding caller.

use std::net::SocketAddr;
use thiserror::Error;

use crate::replication::types::LogIndex;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Errors raised by the codec when a message cannot be converted.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),
}

/// Errors raised by a transport while delivering a message.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is unreachable (closed endpoint or injected fault).
    #[error("Peer {0} is unreachable")]
    Unreachable(SocketAddr),

    /// The local endpoint has been shut down.
    #[error("Transport closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The encoded message exceeds what the transport can carry.
    #[error("Message of {size} bytes exceeds the {limit} byte transport limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns true when the failure is attributable to the peer or the
    /// path to it. Codec and size failures are local and would fail the
    /// same way for every member.
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, TransportError::Unreachable(_) | TransportError::Io(_))
    }
}

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A send or receive failed.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// An index was appended twice with different operations.
    #[error("Index {index} already holds a different operation")]
    DuplicateIndex { index: LogIndex },

    /// A commit referenced an index this node has never seen.
    #[error("No entry exists at index {index}")]
    UnknownIndex { index: LogIndex },

    /// A submission could not collect acknowledgments from its quorum.
    #[error("Quorum unreachable for index {index}: {acked} of {required} acknowledged ({reason})")]
    QuorumUnreachable {
        index: LogIndex,
        acked: usize,
        required: usize,
        reason: String,
    },

    /// Two members claimed the master role at the same time.
    #[error("Membership conflict: {local} and {remote} both claim master")]
    MembershipConflict {
        local: SocketAddr,
        remote: SocketAddr,
    },

    /// Writes are restricted to the master and this node is not it.
    #[error("Not the master, master is {master:?}")]
    NotMaster { master: Option<SocketAddr> },

    /// The operation could not be encoded for replication.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The operation does not fit into a single transport message.
    #[error("Operation too large: {size} bytes encoded, transport limit is {limit}")]
    OperationTooLarge { size: usize, limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Maps a failure to encode an outbound message to the error reported
    /// to the submitter.
    pub fn from_outbound(error: TransportError) -> Self {
        match error {
            TransportError::Codec(e) => ClusterError::Codec(e),
            TransportError::MessageTooLarge { size, limit } => {
                ClusterError::OperationTooLarge { size, limit }
            }
            other => ClusterError::Transport(other),
        }
    }

    /// Returns true for errors that indicate a protocol violation by a peer
    /// rather than a local failure. These are logged and the message dropped.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ClusterError::DuplicateIndex { .. } | ClusterError::UnknownIndex { .. }
        )
    }
}
