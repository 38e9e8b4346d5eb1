//! Correlation id assignment.

use axum::extract::Request;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::types::RequestId;

/// Node id for v1 UUIDs, picked at random once per process.
static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();

fn node_id() -> &'static [u8; 6] {
    NODE_ID.get_or_init(rand::random)
}

/// Generate a time-ordered correlation id and attach it to the request.
pub fn assign_request_id(request: &mut Request) -> RequestId {
    let id = RequestId(Uuid::now_v1(node_id()));
    request.extensions_mut().insert(id);
    id
}
