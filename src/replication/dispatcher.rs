//! Request Dispatcher
//!
//! Drives one operation from proposal to commit on the node that originated
//! it:
//! 1. **Propose**: check that the operation fits a single message, snapshot
//!    the live members, stamp the next index and send APPEND_PENDING to each
//!    of them (the local log is appended directly).
//! 2. **Collect**: wait for ACKs. A member that cannot be reached, or does
//!    not acknowledge within its attempt budget, is evicted cluster-wide
//!    and stops counting towards the quorum. Encoding and size failures are
//!    local and never evict anyone.
//! 3. **Commit**: once the quorum policy is met, commit locally and send
//!    COMMIT to every member still required.
//!
//! Submissions run concurrently; each owns its `PendingCommit`.

use super::log::ReplicatedLog;
use super::pending::PendingCommit;
use super::types::{LogIndex, Operation};
use crate::config::{ClusterConfig, IndexAssignment, MAX_RETRY_BACKOFF_MS, QuorumPolicy, RETRY_JITTER_MS};
use crate::error::{ClusterError, ClusterResult, TransportError};
use crate::membership::service::MembershipService;
use crate::transport::Transport;
use crate::transport::protocol::ClusterMessage;

use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Why a member failed to acknowledge.
#[derive(Debug)]
enum DeliveryFailure {
    Transport(TransportError),
    Timeout,
    Rejected(ClusterError),
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Transport(e) => write!(f, "transport failure: {}", e),
            DeliveryFailure::Timeout => write!(f, "no acknowledgment"),
            DeliveryFailure::Rejected(e) => write!(f, "rejected locally: {}", e),
        }
    }
}

pub struct RequestDispatcher {
    membership: Arc<MembershipService>,
    log: Arc<ReplicatedLog>,
    transport: Arc<dyn Transport>,
    next_index: AtomicU64,
    ack_waiters: DashMap<(LogIndex, SocketAddr), oneshot::Sender<()>>,
    quorum: QuorumPolicy,
    index_assignment: IndexAssignment,
    send_attempts: usize,
    attempt_timeout: Duration,
    retry_backoff: Duration,
    submit_deadline: Duration,
}

impl RequestDispatcher {
    pub fn new(
        membership: Arc<MembershipService>,
        log: Arc<ReplicatedLog>,
        transport: Arc<dyn Transport>,
        config: &ClusterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            log,
            transport,
            next_index: AtomicU64::new(0),
            ack_waiters: DashMap::new(),
            quorum: config.quorum,
            index_assignment: config.index_assignment,
            send_attempts: config.timing.send_attempts.max(1),
            attempt_timeout: config.attempt_timeout(),
            retry_backoff: config.retry_backoff(),
            submit_deadline: config.submit_deadline(),
        })
    }

    /// Stamps the next index: one past the larger of the local counter and
    /// the highest index this node has stored, so indices proposed by other
    /// originators are skipped.
    pub fn allocate_index(&self) -> LogIndex {
        loop {
            let current = self.next_index.load(Ordering::SeqCst);
            let base = current.max(self.log.highest_index());
            let next = base + 1;
            if self
                .next_index
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }

    /// Replicates `operation` and returns its committed index.
    ///
    /// Fails with `QuorumUnreachable` if the required set empties, the local
    /// append is rejected, or the overall deadline elapses. On failure no
    /// COMMIT is sent for the index. An operation the transport cannot carry
    /// fails with `Codec` or `OperationTooLarge` before any index is stamped.
    pub async fn submit(&self, operation: Operation) -> ClusterResult<LogIndex> {
        if self.index_assignment == IndexAssignment::MasterOnly && !self.membership.is_master() {
            return Err(ClusterError::NotMaster {
                master: self.membership.current_master().map(|m| m.address),
            });
        }

        self.check_fits(&operation)?;

        let members: Vec<SocketAddr> = self
            .membership
            .members()
            .into_iter()
            .map(|m| m.address)
            .collect();
        let index = self.allocate_index();

        tracing::debug!(
            "Proposing '{}' at index {} to {} member(s)",
            operation.kind,
            index,
            members.len()
        );

        let mut pending = PendingCommit::new(index, members.iter().copied());
        let outcome = tokio::time::timeout(
            self.submit_deadline,
            self.collect_acks(&mut pending, &members, &operation),
        )
        .await;

        self.ack_waiters.retain(|(waiting_index, _), _| *waiting_index != index);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!("Submission of index {} timed out after {:?}", index, self.submit_deadline);
                return Err(ClusterError::QuorumUnreachable {
                    index,
                    acked: pending.acked(),
                    required: pending.required(),
                    reason: format!("deadline of {:?} elapsed", self.submit_deadline),
                });
            }
        }

        self.commit_everywhere(&pending).await?;
        Ok(index)
    }

    /// Encodes the APPEND_PENDING for `operation` with the widest possible
    /// index, so the real message is never larger than the one checked.
    fn check_fits(&self, operation: &Operation) -> ClusterResult<()> {
        let widest = ClusterMessage::AppendPending {
            index: LogIndex::MAX,
            operation: operation.clone(),
        };
        match self.transport.check_outbound(&widest) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("Refusing '{}' operation: {}", operation.kind, e);
                Err(ClusterError::from_outbound(e))
            }
        }
    }

    async fn collect_acks(
        &self,
        pending: &mut PendingCommit,
        members: &[SocketAddr],
        operation: &Operation,
    ) -> ClusterResult<()> {
        let index = pending.index;
        let mut deliveries: FuturesUnordered<_> = members
            .iter()
            .map(|member| async move {
                let result = self.deliver(*member, index, operation).await;
                (*member, result)
            })
            .collect();

        while let Some((member, result)) = deliveries.next().await {
            match result {
                Ok(()) => {
                    pending.record_ack(member);
                    tracing::trace!("Index {}: ack from {} ({}/{})", index, member, pending.acked(), pending.required());
                }
                Err(DeliveryFailure::Rejected(e)) => {
                    return Err(ClusterError::QuorumUnreachable {
                        index,
                        acked: pending.acked(),
                        required: pending.required(),
                        reason: e.to_string(),
                    });
                }
                Err(failure) => {
                    tracing::warn!("Index {}: evicting {} ({})", index, member, failure);
                    pending.evict(member);
                    self.membership.remove_member(member, true).await;
                }
            }

            if pending.is_satisfied(self.quorum) {
                return Ok(());
            }
            if pending.is_unreachable() {
                break;
            }
        }

        Err(ClusterError::QuorumUnreachable {
            index,
            acked: pending.acked(),
            required: pending.required(),
            reason: "not enough members acknowledged".to_string(),
        })
    }

    /// Gets `operation` stored as PENDING on `member`, retrying with
    /// exponential backoff and jitter.
    async fn deliver(
        &self,
        member: SocketAddr,
        index: LogIndex,
        operation: &Operation,
    ) -> Result<(), DeliveryFailure> {
        if member == self.transport.local_addr() {
            return self
                .log
                .append_pending(index, operation.clone())
                .map(|_| ())
                .map_err(DeliveryFailure::Rejected);
        }

        let (ack_tx, mut ack_rx) = oneshot::channel();
        self.ack_waiters.insert((index, member), ack_tx);

        let message = ClusterMessage::AppendPending {
            index,
            operation: operation.clone(),
        };
        let mut delay = self.retry_backoff;
        let mut last_failure = DeliveryFailure::Timeout;

        for attempt in 0..self.send_attempts {
            match self.transport.send_to(member, &message).await {
                Ok(()) => match tokio::time::timeout(self.attempt_timeout, &mut ack_rx).await {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(_)) => return Err(DeliveryFailure::Timeout),
                    Err(_) => last_failure = DeliveryFailure::Timeout,
                },
                Err(e) if e.is_peer_failure() => last_failure = DeliveryFailure::Transport(e),
                Err(e) => {
                    self.ack_waiters.remove(&(index, member));
                    return Err(DeliveryFailure::Rejected(ClusterError::from_outbound(e)));
                }
            }

            if attempt + 1 == self.send_attempts {
                break;
            }
            tracing::debug!(
                "Index {}: attempt {} to {} failed ({}), retrying",
                index,
                attempt + 1,
                member,
                last_failure
            );
            let jitter = Duration::from_millis(rand::random::<u64>() % RETRY_JITTER_MS);
            tokio::time::sleep(delay + jitter).await;
            delay = (delay * 2).min(Duration::from_millis(MAX_RETRY_BACKOFF_MS));
        }

        Err(last_failure)
    }

    /// Routes an ACK to the submission waiting for it. Late ACKs for
    /// finished or abandoned submissions are ignored.
    pub fn on_ack(&self, index: LogIndex, from: SocketAddr) {
        match self.ack_waiters.remove(&(index, from)) {
            Some((_, waiter)) => {
                let _ = waiter.send(());
            }
            None => {
                tracing::trace!("Ignoring ack for index {} from {}", index, from);
            }
        }
    }

    /// Commits locally, then sends COMMIT to every required member.
    async fn commit_everywhere(&self, pending: &PendingCommit) -> ClusterResult<()> {
        let index = pending.index;
        let local = self.transport.local_addr();

        self.log.commit(index)?;

        let message = ClusterMessage::Commit { index };
        let peers: Vec<SocketAddr> = pending.expected().copied().filter(|peer| *peer != local).collect();
        for peer in peers {
            match self.transport.send_to(peer, &message).await {
                Ok(()) => {}
                Err(e) if e.is_peer_failure() => {
                    tracing::warn!("Index {}: commit to {} failed ({}), evicting", index, peer, e);
                    self.membership.remove_member(peer, true).await;
                }
                Err(e) => {
                    tracing::error!("Index {}: could not send commit to {}: {}", index, peer, e);
                }
            }
        }

        tracing::info!(
            "Index {} committed with {}/{} acknowledgments",
            index,
            pending.acked(),
            pending.required()
        );
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.ack_waiters.len()
    }
}
