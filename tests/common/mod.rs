//! Common test utilities for cluster-coord integration tests.

use cluster_coord::config::{ClusterConfig, ClusterConfigBuilder};
use cluster_coord::membership::types::MemberRole;
use cluster_coord::node::ClusterNode;
use cluster_coord::replication::registry::EffectRegistry;
use cluster_coord::replication::types::LogIndex;
use cluster_coord::transport::memory::MemoryNetwork;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// Atomic counter for allocating unique ports.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(17000);

/// Get a unique port for testing.
pub fn get_test_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

pub fn local(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Applied payloads per index, as seen by one node's effect.
pub type AppliedLog = Arc<DashMap<LogIndex, String>>;

/// Config with timings short enough for tests.
pub fn test_config(addr: SocketAddr) -> ClusterConfigBuilder {
    ClusterConfig::builder()
        .bind_addr(addr)
        .discovery_timeout_ms(300)
        .member_timeout_ms(300)
        .send_attempts(3)
        .retry_backoff_ms(10)
        .submit_deadline_ms(5_000)
        .purge_interval_ms(60_000)
}

/// Registers the "note" effect, which records the payload as text.
pub fn recording_effects() -> (Arc<EffectRegistry>, AppliedLog) {
    let applied: AppliedLog = Arc::new(DashMap::new());
    let effects = EffectRegistry::new();
    let sink = applied.clone();
    effects.register("note", move |entry| {
        let previous = sink.insert(
            entry.index,
            String::from_utf8_lossy(&entry.operation.payload).to_string(),
        );
        assert!(previous.is_none(), "index {} applied twice", entry.index);
        Ok(())
    });
    (effects, applied)
}

/// Nodes sharing one in-process network.
#[allow(dead_code)]
pub struct TestCluster {
    pub network: Arc<MemoryNetwork>,
    pub nodes: Vec<Arc<ClusterNode>>,
    pub applied: Vec<AppliedLog>,
}

#[allow(dead_code)]
impl TestCluster {
    /// Starts `node_count` nodes and joins them one after the other, so the
    /// first (lowest address) becomes master.
    pub async fn new(node_count: usize) -> Self {
        Self::with_config(node_count, |builder| builder).await
    }

    pub async fn with_config(
        node_count: usize,
        customize: impl Fn(ClusterConfigBuilder) -> ClusterConfigBuilder,
    ) -> Self {
        let network = MemoryNetwork::new();
        let mut cluster = Self {
            network,
            nodes: Vec::with_capacity(node_count),
            applied: Vec::with_capacity(node_count),
        };

        for _ in 0..node_count {
            let addr = local(get_test_port());
            let config = customize(test_config(addr))
                .build()
                .expect("Invalid config");
            let (effects, applied) = recording_effects();
            let node = ClusterNode::start(config, cluster.network.endpoint(addr), effects);
            node.join_cluster().await;
            cluster.nodes.push(node);
            cluster.applied.push(applied);
        }

        let expected = node_count;
        let converged = cluster
            .wait_until(|c| {
                c.nodes
                    .iter()
                    .all(|n| n.membership.members().len() == expected)
            })
            .await;
        assert!(converged, "cluster views did not converge");
        cluster
    }

    pub fn node(&self, i: usize) -> &Arc<ClusterNode> {
        &self.nodes[i]
    }

    pub fn address(&self, i: usize) -> SocketAddr {
        self.nodes[i].local_addr()
    }

    /// Simulates a crash: the node can no longer send or receive.
    pub fn crash(&self, i: usize) {
        self.network.disconnect(self.address(i));
    }

    pub fn recover(&self, i: usize) {
        self.network.reconnect(self.address(i));
    }

    /// Replaces node `i` with a fresh node on the same address and joins
    /// it. Everything the old node held is lost.
    pub async fn restart(&mut self, i: usize) -> MemberRole {
        let addr = self.address(i);
        self.nodes[i].shutdown();

        let config = test_config(addr).build().expect("Invalid config");
        let (effects, applied) = recording_effects();
        let node = ClusterNode::start(config, self.network.endpoint(addr), effects);
        let role = node.join_cluster().await;

        self.nodes[i] = node;
        self.applied[i] = applied;
        role
    }

    /// Number of nodes whose own view names them MASTER.
    pub fn self_declared_masters(&self, among: &[usize]) -> usize {
        among
            .iter()
            .filter(|i| self.nodes[**i].membership.local_role() == MemberRole::Master)
            .count()
    }

    /// Polls `check` for up to five seconds.
    pub async fn wait_until(&self, check: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..250 {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check(self)
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown();
        }
    }
}
