use super::protocol::*;
use crate::error::ClusterError;
use crate::node::ClusterNode;
use crate::replication::types::{LogIndex, Operation};

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

pub async fn handle_submit(
    Extension(node): Extension<Arc<ClusterNode>>,
    Json(req): Json<SubmitRequest>,
) -> (StatusCode, Json<SubmitResponse>) {
    let operation = match Operation::json(req.kind, &req.payload) {
        Ok(operation) => operation,
        Err(e) => {
            tracing::error!("Failed to encode payload: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(SubmitResponse {
                    success: false,
                    index: None,
                    error: Some(e.to_string()),
                }),
            );
        }
    };

    match node.submit(operation).await {
        Ok(index) => {
            tracing::info!("Submission committed at index {}", index);
            (
                StatusCode::OK,
                Json(SubmitResponse {
                    success: true,
                    index: Some(index),
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::error!("Submission failed: {}", e);
            let status = match e {
                ClusterError::NotMaster { .. } => StatusCode::CONFLICT,
                ClusterError::QuorumUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ClusterError::OperationTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ClusterError::Codec(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(SubmitResponse {
                    success: false,
                    index: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_members(
    Extension(node): Extension<Arc<ClusterNode>>,
) -> (StatusCode, Json<MembersResponse>) {
    let view = node.membership.snapshot();
    (
        StatusCode::OK,
        Json(MembersResponse {
            members: view.live_members(),
            master: view.master,
            version: view.version,
        }),
    )
}

pub async fn handle_health(
    Extension(node): Extension<Arc<ClusterNode>>,
) -> (StatusCode, Json<HealthResponse>) {
    let view = node.membership.snapshot();
    (
        StatusCode::OK,
        Json(HealthResponse {
            address: node.local_addr(),
            role: node.membership.local_role(),
            master: view.master,
            member_count: view.live_addresses().len(),
            last_committed_index: node.log.last_committed_index(),
            highest_index: node.log.highest_index(),
            pending_entries: node.log.pending_indices().len(),
        }),
    )
}

pub async fn handle_get_entry(
    Extension(node): Extension<Arc<ClusterNode>>,
    Path(index): Path<LogIndex>,
) -> (StatusCode, Json<Option<EntryResponse>>) {
    match node.log.entry(index) {
        Some(entry) => {
            let payload = entry.operation.decode_json().ok();
            (
                StatusCode::OK,
                Json(Some(EntryResponse {
                    index: entry.index,
                    kind: entry.operation.kind,
                    state: entry.state,
                    payload,
                })),
            )
        }
        None => (StatusCode::NOT_FOUND, Json(None)),
    }
}
