//! Cluster Wire Protocol
//!
//! Every control message exchanged between nodes. Handlers match on this
//! enum exhaustively, so adding a kind forces every router to handle it.

use crate::membership::types::Member;
use crate::replication::types::{LogIndex, Operation};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Probe sent by a joining node. Carries the joiner so that a follower
    /// can forward it to the master unchanged.
    Discover { member: Member },

    /// Membership list sent by the master to a joiner and to every live
    /// member after the view changed.
    DiscoverReply {
        members: Vec<Member>,
        master: Option<SocketAddr>,
    },

    /// Proposal of `operation` at `index`; stored as PENDING by receivers.
    AppendPending { index: LogIndex, operation: Operation },

    /// Acknowledges that the sender stored `index` as PENDING.
    Ack { index: LogIndex },

    /// Instructs receivers to commit `index`.
    Commit { index: LogIndex },

    /// Propagates the eviction of `address`.
    RemoveMember { address: SocketAddr },
}

impl ClusterMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterMessage::Discover { .. } => "DISCOVER",
            ClusterMessage::DiscoverReply { .. } => "DISCOVER_REPLY",
            ClusterMessage::AppendPending { .. } => "APPEND_PENDING",
            ClusterMessage::Ack { .. } => "ACK",
            ClusterMessage::Commit { .. } => "COMMIT",
            ClusterMessage::RemoveMember { .. } => "REMOVE_MEMBER",
        }
    }

    /// Log index carried by the message, if any.
    pub fn index(&self) -> Option<LogIndex> {
        match self {
            ClusterMessage::AppendPending { index, .. }
            | ClusterMessage::Ack { index }
            | ClusterMessage::Commit { index } => Some(*index),
            ClusterMessage::Discover { .. }
            | ClusterMessage::DiscoverReply { .. }
            | ClusterMessage::RemoveMember { .. } => None,
        }
    }
}
