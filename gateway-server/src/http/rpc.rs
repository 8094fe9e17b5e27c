//! Plain JSON-RPC POST endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use crate::router::{RequestScope, RpcOutcome};

use super::{auth_context, SharedState};

/// `POST /rpc`: gateway-scoped single or batch JSON-RPC.
pub async fn handle_rpc(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = auth_context(&state, &headers, None, None);
    dispatch(&state, auth, &body).await
}

/// `POST /servers/{id}/rpc`: JSON-RPC bound to one backend.
pub async fn handle_server_rpc(
    State(state): State<SharedState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = auth_context(&state, &headers, Some(server_id), None);
    dispatch(&state, auth, &body).await
}

async fn dispatch(state: &SharedState, auth: crate::model::AuthContext, body: &[u8]) -> Response {
    let scope = RequestScope::new(auth);
    let outcome = state.router.dispatch(&scope, body).await;
    respond(outcome)
}

/// Serialize an outcome: JSON body, or empty 204 for all-notification
/// payloads.
pub(crate) fn respond(outcome: RpcOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match outcome.to_body() {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}
