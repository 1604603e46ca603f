//! Admin HTTP API
//!
//! A small axum surface over a running node: submit operations, inspect
//! membership, and read log progress for monitoring. `client` is the typed
//! counterpart used by tools and tests.

pub mod client;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;

use crate::node::ClusterNode;
use axum::{
    Extension, Router,
    routing::{get, post},
};
use handlers::*;
use protocol::*;
use std::sync::Arc;

pub fn router(node: Arc<ClusterNode>) -> Router {
    Router::new()
        .route(ENDPOINT_SUBMIT, post(handle_submit))
        .route(ENDPOINT_MEMBERS, get(handle_members))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .route(&format!("{}/:index", ENDPOINT_LOG), get(handle_get_entry))
        .layer(Extension(node))
}
