use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::membership::service::MembershipService;
use crate::membership::types::MemberRole;
use crate::replication::dispatcher::RequestDispatcher;
use crate::replication::log::ReplicatedLog;
use crate::replication::registry::EffectRegistry;
use crate::replication::types::{LogIndex, Operation};
use crate::transport::Transport;
use crate::transport::codec::codec_for;
use crate::transport::protocol::ClusterMessage;
use crate::transport::udp::UdpTransport;

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct ClusterNode {
    pub config: ClusterConfig,
    pub membership: Arc<MembershipService>,
    pub log: Arc<ReplicatedLog>,
    pub dispatcher: Arc<RequestDispatcher>,
    transport: Arc<dyn Transport>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterNode {
    /// Binds a UDP transport from `config` and starts the node.
    pub async fn bind(config: ClusterConfig, effects: Arc<EffectRegistry>) -> ClusterResult<Arc<Self>> {
        config.validate()?;
        let transport = UdpTransport::bind(
            config.bind_addr,
            codec_for(config.codec),
            config.seeds.clone(),
        )
        .await?;
        Ok(Self::start(config, transport, effects))
    }

    /// Starts a node on an existing transport. The node is not part of any
    /// cluster until [`join_cluster`](Self::join_cluster) runs.
    pub fn start(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        effects: Arc<EffectRegistry>,
    ) -> Arc<Self> {
        let membership = MembershipService::new(transport.clone(), config.discovery_timeout());
        let log = Arc::new(ReplicatedLog::new(effects));
        let dispatcher =
            RequestDispatcher::new(membership.clone(), log.clone(), transport.clone(), &config);

        let node = Arc::new(Self {
            config,
            membership,
            log,
            dispatcher,
            transport,
            tasks: Mutex::new(Vec::new()),
        });

        let receive_handle = {
            let node = node.clone();
            tokio::spawn(async move {
                node.receive_loop().await;
            })
        };

        let housekeeping_handle = {
            let node = node.clone();
            tokio::spawn(async move {
                node.housekeeping_loop().await;
            })
        };

        node.tasks.lock().extend([receive_handle, housekeeping_handle]);
        tracing::info!("Node {} started", node.local_addr());
        node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub async fn join_cluster(&self) -> MemberRole {
        self.membership.join_cluster().await
    }

    pub async fn submit(&self, operation: Operation) -> ClusterResult<LogIndex> {
        self.dispatcher.submit(operation).await
    }

    pub fn last_committed_index(&self) -> LogIndex {
        self.log.last_committed_index()
    }

    /// Stops the background tasks. The transport endpoint stays bound until
    /// the last reference to the node is dropped.
    pub fn shutdown(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        tracing::info!("Node {} stopped", self.local_addr());
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok((from, message)) => {
                    let kind = message.kind();
                    if let Err(e) = self.handle_message(from, message).await {
                        if e.is_protocol_violation() {
                            tracing::warn!("Dropped {} from {}: {}", kind, from, e);
                        } else {
                            tracing::error!("Error handling {} from {}: {}", kind, from, e);
                        }
                    }
                }
                Err(crate::error::TransportError::Closed) => {
                    tracing::info!("Transport closed, stopping receive loop");
                    return;
                }
                Err(e) => {
                    tracing::warn!("Failed to receive message: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    async fn handle_message(&self, from: SocketAddr, message: ClusterMessage) -> ClusterResult<()> {
        tracing::debug!("Received {} from {}", message.kind(), from);

        match message {
            ClusterMessage::Discover { member } => {
                self.membership.on_discovery_message(member).await?;
            }

            ClusterMessage::DiscoverReply { members, master } => {
                self.membership
                    .on_discovery_reply(from, members, master)
                    .await?;
            }

            ClusterMessage::AppendPending { index, operation } => {
                self.log.append_pending(index, operation)?;
                self.transport
                    .send_to(from, &ClusterMessage::Ack { index })
                    .await
                    .map_err(ClusterError::from)?;
            }

            ClusterMessage::Ack { index } => {
                self.dispatcher.on_ack(index, from);
            }

            ClusterMessage::Commit { index } => {
                self.log.commit_or_defer(index)?;
            }

            ClusterMessage::RemoveMember { address } => {
                self.membership.remove_member(address, false).await;
            }
        }

        Ok(())
    }

    async fn housekeeping_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.purge_interval());

        loop {
            interval.tick().await;
            let purged = self.membership.purge_removed();
            if purged > 0 {
                tracing::info!("Housekeeping purged {} removed member(s)", purged);
            }
        }
    }
}
