//! Admin API Tests
//!
//! Serves the router on an ephemeral loopback port and talks to it through
//! `ClusterClient`, so handlers and client are checked against each other.

#[cfg(test)]
mod tests {
    use crate::api::client::ClusterClient;
    use crate::api::router;
    use crate::config::{ClusterConfig, IndexAssignment};
    use crate::membership::types::MemberRole;
    use crate::node::ClusterNode;
    use crate::replication::registry::EffectRegistry;
    use crate::replication::types::EntryState;
    use crate::transport::memory::MemoryNetwork;

    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn config(port: u16) -> ClusterConfig {
        ClusterConfig::builder()
            .bind_addr(addr(port))
            .discovery_timeout_ms(100)
            .build()
            .unwrap()
    }

    async fn serve(node: Arc<ClusterNode>) -> ClusterClient {
        let listener = tokio::net::TcpListener::bind(addr(0)).await.unwrap();
        let http_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(node)).await.unwrap();
        });
        ClusterClient::new(http_addr)
    }

    async fn single_node(config: ClusterConfig) -> (Arc<ClusterNode>, ClusterClient) {
        let network = MemoryNetwork::new();
        let effects = EffectRegistry::new();
        effects.register("kv.put", |_entry| Ok(()));
        let node = ClusterNode::start(config.clone(), network.endpoint(config.bind_addr), effects);
        node.join_cluster().await;
        let client = serve(node.clone()).await;
        (node, client)
    }

    #[tokio::test]
    async fn test_submit_and_read_back_entry() {
        // ARRANGE
        let (_node, client) = single_node(config(7101)).await;

        // ACT
        let index = client
            .submit("kv.put", &json!({"key": "color", "value": "blue"}))
            .await
            .unwrap();
        let entry = client.entry(index).await.unwrap().unwrap();

        // ASSERT
        assert_eq!(index, 1);
        assert_eq!(entry.kind, "kv.put");
        assert_eq!(entry.state, EntryState::Committed);
        assert_eq!(entry.payload, Some(json!({"key": "color", "value": "blue"})));
    }

    #[tokio::test]
    async fn test_missing_entry_is_none() {
        let (_node, client) = single_node(config(7102)).await;

        assert!(client.entry(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_members_and_health() {
        let (node, client) = single_node(config(7103)).await;
        node.submit(crate::replication::types::Operation::new("kv.put", b"{}".to_vec()))
            .await
            .unwrap();

        let members = client.members().await.unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(members.members.len(), 1);
        assert_eq!(members.master, Some(addr(7103)));
        assert_eq!(health.address, addr(7103));
        assert_eq!(health.role, MemberRole::Master);
        assert_eq!(health.member_count, 1);
        assert_eq!(health.last_committed_index, 1);
        assert_eq!(health.pending_entries, 0);
    }

    #[tokio::test]
    async fn test_submit_to_non_master_is_rejected() {
        // ARRANGE: the node never joins, so it is not master
        let config = ClusterConfig::builder()
            .bind_addr(addr(7104))
            .index_assignment(IndexAssignment::MasterOnly)
            .build()
            .unwrap();
        let network = MemoryNetwork::new();
        let node = ClusterNode::start(config, network.endpoint(addr(7104)), EffectRegistry::new());
        let client = serve(node).await;

        // ACT
        let result = client.submit("kv.put", &json!({"key": "k"})).await;

        // ASSERT
        let error = result.unwrap_err().to_string();
        assert!(error.contains("409"), "unexpected error: {}", error);
    }

    #[tokio::test]
    async fn test_oversized_submit_is_rejected_with_413() {
        // ARRANGE
        let config = config(7105);
        let network = MemoryNetwork::with_max_message_size(1_024);
        let effects = EffectRegistry::new();
        effects.register("kv.put", |_entry| Ok(()));
        let node = ClusterNode::start(config.clone(), network.endpoint(config.bind_addr), effects);
        node.join_cluster().await;
        let client = serve(node.clone()).await;

        // ACT
        let result = client
            .submit("kv.put", &json!({"key": "k", "value": "x".repeat(4_096)}))
            .await;

        // ASSERT
        let error = result.unwrap_err().to_string();
        assert!(error.contains("413"), "unexpected error: {}", error);
        assert!(node.log.is_empty());
    }
}
