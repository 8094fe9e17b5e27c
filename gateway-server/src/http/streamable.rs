//! Streamable HTTP endpoint: JSON or SSE from the same path.
//!
//! POST carries JSON-RPC. The response body is JSON unless the Accept
//! header asks for `text/event-stream` (with the configured mode breaking
//! the tie when a client accepts both). In stateful operation the
//! gateway allocates a session on `initialize`, returns its id in both
//! `X-Session-ID` and `mcp-session-id`, and records responses in the
//! session ring for replay; a bare request with no session header is
//! served statelessly. GET opens the session's SSE stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::stream;

use gateway_core::transport::{EventKind, TransportKind};

use crate::config::StreamableMode;
use crate::router::RequestScope;
use crate::session::Session;

use super::sse::{session_event_stream, SseQuery};
use super::{auth_context, error_reply, header_str, SharedState};

/// `POST /mcp`: gateway-scoped streamable request.
pub async fn handle_post(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    post_impl(state, headers, None, body).await
}

/// `POST /servers/{id}/mcp`: streamable request bound to one backend.
pub async fn handle_server_post(
    State(state): State<SharedState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    post_impl(state, headers, Some(server_id), body).await
}

/// `GET /mcp`: SSE stream of the session's events.
pub async fn handle_get(
    State(state): State<SharedState>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    get_impl(state, headers, query, None).await
}

/// `GET /servers/{id}/mcp`: backend-bound session stream.
pub async fn handle_server_get(
    State(state): State<SharedState>,
    Path(server_id): Path<String>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    get_impl(state, headers, query, Some(server_id)).await
}

/// `HEAD /mcp`: endpoint discovery without a body.
pub async fn handle_head() -> Response {
    ([("content-type", "application/json")], StatusCode::OK).into_response()
}

/// `OPTIONS /mcp`: answered here when CORS preflight does not intercept.
pub async fn handle_options() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

async fn post_impl(
    state: SharedState,
    headers: HeaderMap,
    server_id: Option<String>,
    body: Bytes,
) -> Response {
    let auth = auth_context(&state, &headers, server_id.clone(), None);

    // Stateful when the client presents a session or starts a handshake.
    let presented = header_str(&headers, "mcp-session-id");
    let initializing = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("method")
                .and_then(|m| m.as_str())
                .map(|m| m == "initialize")
        })
        .unwrap_or(false);

    let session: Option<Arc<Session>> = match presented {
        Some(id) => match state.sessions.get(&id).await {
            Ok(session) => {
                session.touch().await;
                Some(session)
            }
            Err(e) => return error_reply(&e),
        },
        None if initializing => {
            match state
                .manager
                .create_connection(
                    TransportKind::Http,
                    &auth.user_id,
                    &auth.organization_id,
                    server_id,
                    None,
                )
                .await
            {
                Ok(handle) => Some(handle.session),
                Err(e) => return error_reply(&e),
            }
        }
        None => None,
    };

    let scope = RequestScope::new(auth);
    let outcome = state.router.dispatch(&scope, &body).await;

    // Stateful responses also land in the ring for replay.
    if let (Some(session), Some(body)) = (&session, outcome.to_body()) {
        session.append_event(EventKind::Message, body).await;
    }

    let wants_sse = accepts_sse(&headers, state.config.streamable_mode);
    let mut response = if wants_sse {
        match outcome.to_body() {
            Some(body) => {
                let event = Event::default().event("message").data(body.to_string());
                let stream = stream::iter([Ok::<_, Infallible>(event)]);
                Sse::new(stream).into_response()
            }
            None => StatusCode::NO_CONTENT.into_response(),
        }
    } else {
        let status = StatusCode::from_u16(outcome.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match outcome.to_body() {
            Some(body) => (status, Json(body)).into_response(),
            None => status.into_response(),
        }
    };

    if let Some(session) = session {
        if let Ok(value) = session.id.parse() {
            response.headers_mut().insert("x-session-id", value);
        }
        if let Ok(value) = session.id.parse() {
            response.headers_mut().insert("mcp-session-id", value);
        }
    }
    response
}

async fn get_impl(
    state: SharedState,
    headers: HeaderMap,
    query: SseQuery,
    server_id: Option<String>,
) -> Response {
    let auth = auth_context(&state, &headers, server_id.clone(), None);

    let presented = query
        .session_id
        .clone()
        .or_else(|| header_str(&headers, "mcp-session-id"));
    let session = match presented {
        Some(id) => match state.sessions.get(&id).await {
            Ok(session) => session,
            Err(e) => return error_reply(&e),
        },
        None => {
            match state
                .manager
                .create_connection(
                    TransportKind::Http,
                    &auth.user_id,
                    &auth.organization_id,
                    server_id,
                    None,
                )
                .await
            {
                Ok(handle) => handle.session,
                Err(e) => return error_reply(&e),
            }
        }
    };

    let last_event_id = header_str(&headers, "last-event-id").and_then(|v| v.parse::<u64>().ok());
    let stream = session_event_stream(Arc::clone(&session), last_event_id, None).await;
    let session_id = session.id.clone();

    (
        [
            ("x-session-id", session_id.clone()),
            ("mcp-session-id", session_id),
            ("x-accel-buffering", "no".to_string()),
        ],
        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(30))
                .text("ping"),
        ),
    )
        .into_response()
}

/// Accept negotiation: an explicit `text/event-stream` wins; a client
/// accepting both defers to the configured default mode.
fn accepts_sse(headers: &HeaderMap, mode: StreamableMode) -> bool {
    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let sse = accept.contains("text/event-stream");
    let json = accept.contains("application/json") || accept.contains("*/*");
    match (sse, json) {
        (true, false) => true,
        (true, true) => mode == StreamableMode::Sse,
        _ => false,
    }
}
