//! Cluster Node Module
//!
//! A `ClusterNode` wires one transport to the membership service, the
//! replicated log and the request dispatcher, and runs the background tasks
//! that keep them fed:
//!
//! - **Receive loop**: drains the transport and routes every message to its
//!   handler. Handler errors are logged, never propagated, so a malformed or
//!   conflicting message cannot stop the node.
//! - **Housekeeping**: periodically purges members flagged as removed.

pub mod node;


pub use node::ClusterNode;
