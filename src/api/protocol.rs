//! Admin API Protocol
//!
//! Endpoints and Data Transfer Objects for the node's HTTP admin surface.
//! Bodies are JSON.

use crate::membership::types::{Member, MemberRole};
use crate::replication::types::{EntryState, LogIndex};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

// --- API Endpoints ---

/// Submit an operation for replication.
pub const ENDPOINT_SUBMIT: &str = "/submit";
/// Live members and the current master.
pub const ENDPOINT_MEMBERS: &str = "/members";
/// Node role and log progress, for monitoring.
pub const ENDPOINT_HEALTH: &str = "/health";
/// A single log entry by index.
pub const ENDPOINT_LOG: &str = "/log";

// --- Data Transfer Objects ---

/// Client request to replicate an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Effect name the operation is applied with (e.g. "kv.put").
    pub kind: String,
    /// Operation payload, stored as JSON bytes in the log.
    pub payload: serde_json::Value,
}

/// Outcome of a submission. There are no partial states: either `index` is
/// set and the operation committed, or `error` explains why it did not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub index: Option<LogIndex>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<Member>,
    pub master: Option<SocketAddr>,
    /// Generation of the view the list was taken from.
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub address: SocketAddr,
    pub role: MemberRole,
    pub master: Option<SocketAddr>,
    pub member_count: usize,
    pub last_committed_index: LogIndex,
    pub highest_index: LogIndex,
    pub pending_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryResponse {
    pub index: LogIndex,
    pub kind: String,
    pub state: EntryState,
    /// Payload decoded as JSON, `None` if it is not valid JSON.
    pub payload: Option<serde_json::Value>,
}
