use anyhow::Context;
use clap::Parser;
use cluster_coord::api;
use cluster_coord::config::{ClusterConfig, QuorumPolicy};
use cluster_coord::node::ClusterNode;
use cluster_coord::replication::registry::EffectRegistry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cluster-node", version, about = "Run a cluster coordination node")]
struct Args {
    /// Cluster transport address; also the node's identity.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Discovery seed (repeatable).
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// Admin HTTP address (defaults to bind port + 1000).
    #[arg(long)]
    http: Option<SocketAddr>,

    /// JSON configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Acknowledgment policy: "all" or "majority".
    #[arg(long)]
    quorum: Option<QuorumPolicy>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Payload of the demo `kv.put` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvPut {
    key: String,
    value: serde_json::Value,
}

/// Payload of the demo `kv.delete` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvDelete {
    key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    // 1. Configuration (file first, flags on top):
    let mut config = match &args.config {
        Some(path) => ClusterConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClusterConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if !args.seeds.is_empty() {
        config.seeds = args.seeds.clone();
    }
    if let Some(http) = args.http {
        config.http_addr = Some(http);
    }
    if let Some(quorum) = args.quorum {
        config.quorum = quorum;
    }
    config.validate()?;

    tracing::info!("Starting node on {}", config.bind_addr);
    if !config.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    } else {
        tracing::info!("No seeds, discovery will only reach peers that contact us");
    }

    // 2. Effects applied on commit. A replicated key-value map for the demo:
    let store: Arc<DashMap<String, serde_json::Value>> = Arc::new(DashMap::new());
    let effects = EffectRegistry::new();

    let put_store = store.clone();
    effects.register("kv.put", move |entry| {
        let put: KvPut = entry.operation.decode_json()?;
        tracing::info!("kv.put {} (index {})", put.key, entry.index);
        put_store.insert(put.key, put.value);
        Ok(())
    });

    let delete_store = store.clone();
    effects.register("kv.delete", move |entry| {
        let delete: KvDelete = entry.operation.decode_json()?;
        tracing::info!("kv.delete {} (index {})", delete.key, entry.index);
        delete_store.remove(&delete.key);
        Ok(())
    });

    // 3. Node and discovery:
    let http_addr = config.http_addr();
    let node = ClusterNode::bind(config, effects).await?;
    let role = node.join_cluster().await;
    tracing::info!(
        "Node {:?} at {} joined as {:?}",
        node.membership.local_member.id,
        node.local_addr(),
        role
    );

    // 4. Spawn stats reporter:
    let stats_node = node.clone();
    let stats_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let view = stats_node.membership.snapshot();
            tracing::info!(
                "Cluster stats: {} live members, master={:?}, view v{}, committed={}, keys={}",
                view.live_addresses().len(),
                view.master,
                view.version,
                stats_node.last_committed_index(),
                stats_store.len()
            );
            for member in view.live_members() {
                tracing::info!("  - {:?} {} {:?}", member.id, member.address, member.role);
            }
        }
    });

    // 5. Start HTTP server:
    let app = api::router(node.clone());

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    node.shutdown();
    Ok(())
}
