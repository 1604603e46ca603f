use super::types::LogIndex;
use crate::config::QuorumPolicy;

use std::collections::HashSet;
use std::net::SocketAddr;

/// Acknowledgment bookkeeping for one in-flight submission.
///
/// Lives on the originating node only and is dropped once the submission
/// commits or fails. Evicted members leave `expected`, which is how a failed
/// member stops blocking the quorum.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub index: LogIndex,
    expected: HashSet<SocketAddr>,
    received: HashSet<SocketAddr>,
    evicted: HashSet<SocketAddr>,
}

impl PendingCommit {
    pub fn new(index: LogIndex, members: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            index,
            expected: members.into_iter().collect(),
            received: HashSet::new(),
            evicted: HashSet::new(),
        }
    }

    /// Records an acknowledgment. Acks from members outside the required
    /// set are ignored. Returns true if the ack was new.
    pub fn record_ack(&mut self, member: SocketAddr) -> bool {
        if !self.expected.contains(&member) {
            return false;
        }
        self.received.insert(member)
    }

    /// Drops `member` from the required set.
    pub fn evict(&mut self, member: SocketAddr) {
        if self.expected.remove(&member) {
            self.evicted.insert(member);
        }
        self.received.remove(&member);
    }

    pub fn is_satisfied(&self, policy: QuorumPolicy) -> bool {
        policy.is_satisfied(self.acked(), self.required())
    }

    pub fn acked(&self) -> usize {
        self.received.len()
    }

    pub fn required(&self) -> usize {
        self.expected.len()
    }

    pub fn is_unreachable(&self) -> bool {
        self.expected.is_empty()
    }

    /// Members still required, acknowledged or not.
    pub fn expected(&self) -> impl Iterator<Item = &SocketAddr> {
        self.expected.iter()
    }

    pub fn has_acked(&self, member: &SocketAddr) -> bool {
        self.received.contains(member)
    }

    pub fn evicted(&self) -> impl Iterator<Item = &SocketAddr> {
        self.evicted.iter()
    }
}
