//! Replication Module
//!
//! Implements the replicated, append-only operation log and the protocol that
//! commits an operation on every member.
//!
//! ## Submodules
//! - **`log`**: Per-node ordered index map; PENDING -> COMMITTED transitions and effect application.
//! - **`dispatcher`**: Originator side of a submission (propose, collect acks, evict, commit).
//! - **`pending`**: Acknowledgment bookkeeping for a single in-flight submission.
//! - **`registry`**: Maps operation kinds to the effects they apply.
//! - **`types`**: Log indices, entries and operations.

pub mod dispatcher;
pub mod log;
pub mod pending;
pub mod registry;
pub mod types;
