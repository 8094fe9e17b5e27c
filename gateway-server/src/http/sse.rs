//! SSE endpoints with session replay.
//!
//! A connecting client either resumes an existing session (via the
//! `mcp-session-id` header or `sessionId` query parameter) or gets a new
//! one. Replay is driven by `Last-Event-ID`, falling back to a `since`
//! RFC 3339 timestamp; the live tail comes from the session's broadcast
//! channel with duplicates filtered against the replay watermark.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use gateway_core::transport::TransportKind;

use crate::session::{Session, SessionEvent};

use super::{auth_context, error_reply, header_str, SharedState};

/// Keepalive ping period on every SSE stream.
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Query parameters accepted on the SSE endpoints.
#[derive(Debug, Deserialize)]
pub struct SseQuery {
    /// Session to resume.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    /// Replay events recorded at or after this RFC 3339 instant.
    pub since: Option<String>,
}

/// `GET /sse`: gateway-scoped event stream.
pub async fn handle_sse(
    State(state): State<SharedState>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    open_stream(state, headers, query, None).await
}

/// `GET /servers/{id}/sse`: stream proxied from one backend.
pub async fn handle_server_sse(
    State(state): State<SharedState>,
    Path(server_id): Path<String>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    open_stream(state, headers, query, Some(server_id)).await
}

async fn open_stream(
    state: SharedState,
    headers: HeaderMap,
    query: SseQuery,
    server_id: Option<String>,
) -> Response {
    let auth = auth_context(&state, &headers, server_id.clone(), None);

    // Resume when the client presents a known session id.
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
            // Fresh stream; server-bound streams also open the child
            // transport whose events feed this session.
            let config = match &server_id {
                Some(server_id) => match state.discovery.get_routable(server_id).await {
                    Ok(server) => match server.transport_config() {
                        Ok(config) => Some(config),
                        Err(e) => return error_reply(&e),
                    },
                    Err(e) => return error_reply(&e),
                },
                None => None,
            };
            match state
                .manager
                .create_connection(
                    TransportKind::Sse,
                    &auth.user_id,
                    &auth.organization_id,
                    server_id,
                    config,
                )
                .await
            {
                Ok(handle) => handle.session,
                Err(e) => return error_reply(&e),
            }
        }
    };

    let last_event_id = header_str(&headers, "last-event-id").and_then(|v| v.parse::<u64>().ok());
    let since = query
        .since
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let stream = session_event_stream(Arc::clone(&session), last_event_id, since).await;
    let session_id = session.id.clone();

    (
        [
            ("mcp-session-id", session_id),
            ("x-accel-buffering", "no".to_string()),
            (
                "cache-control",
                "no-cache, no-store, must-revalidate".to_string(),
            ),
        ],
        Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE).text("ping")),
    )
        .into_response()
}

/// Replay-then-live event stream for one session.
///
/// Subscribing before snapshotting the ring means nothing is lost in
/// between; the watermark filter drops whatever both phases saw.
pub(crate) async fn session_event_stream(
    session: Arc<Session>,
    last_event_id: Option<u64>,
    since: Option<DateTime<Utc>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let rx = session.subscribe();

    let replay = match (last_event_id, since) {
        (Some(after), _) => session.events_after(after).await,
        (None, Some(ts)) => session.events_since(ts).await,
        (None, None) => session.events_after(0).await,
    };
    let watermark = replay
        .last()
        .map(|e| e.event_id)
        .or(last_event_id)
        .unwrap_or(0);

    let replay_stream =
        stream::iter(replay.into_iter().map(|e| Ok::<_, Infallible>(to_sse(&e))));

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.event_id > watermark => Some(Ok(to_sse(&event))),
            // Lagged receivers skip ahead; the client's next reconnect
            // replays whatever the ring still holds.
            _ => None,
        }
    });

    replay_stream.chain(live_stream)
}

pub(crate) fn to_sse(event: &SessionEvent) -> Event {
    Event::default()
        .id(event.event_id.to_string())
        .event(event.kind.as_str())
        .data(event.data.to_string())
}
