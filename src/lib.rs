//! Cluster Coordination Library
//!
//! Membership and replicated-log coordination for a small, trusted cluster
//! of nodes. The binary (`main.rs`) wires these modules into a runnable node
//! with an HTTP admin surface.
//!
//! ## Architecture Modules
//!
//! - **`membership`**: Discovery and the cluster view. New nodes probe the
//!   network, either join an existing cluster as FOLLOWER or found one as
//!   MASTER, and unreachable members are evicted cluster-wide.
//! - **`replication`**: The replicated log. Operations are stamped with an
//!   index, delivered as PENDING to every live member and committed once the
//!   quorum has acknowledged them. Committed entries are applied through the
//!   effect registry.
//! - **`transport`**: Message types, wire codecs and the datagram transports
//!   (UDP for real deployments, an in-process network for tests).
//! - **`node`**: Assembles a running node and routes inbound messages.
//! - **`api`**: Admin HTTP endpoints and a typed client for them.

pub mod api;
pub mod config;
pub mod error;
pub mod membership;
pub mod node;
pub mod replication;
pub mod transport;

pub use config::{ClusterConfig, IndexAssignment, QuorumPolicy};
pub use error::{ClusterError, ClusterResult};
pub use node::ClusterNode;
pub use replication::registry::EffectRegistry;
pub use replication::types::{LogIndex, Operation};
