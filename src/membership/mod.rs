//! Membership & Discovery Module
//!
//! Tracks which nodes belong to the cluster and which one is master.
//!
//! ## Core Mechanisms
//! - **Discovery**: A joining node broadcasts a probe; the master admits it and pushes the
//!   refreshed member list to everyone. Without a reply the joiner founds its own cluster.
//! - **Eviction**: Members are flagged REMOVED when the dispatcher cannot reach them, and the
//!   removal is propagated to the remaining members. Flagged entries are purged later.
//! - **Master Tie-Break**: When the master disappears, or two masters meet, the lowest address wins.
//!   There are no terms or votes.

pub mod service;
pub mod types;
