//! WebSocket endpoints.
//!
//! Each socket gets its own session. Inbound text (or binary) frames are
//! JSON-RPC payloads routed through the dispatcher, with responses sent
//! back on the same socket. Session broadcast events (e.g. manager
//! broadcasts) are forwarded as text frames. Protocol pings are answered
//! with pongs; a close frame or disconnect cancels any in-flight forward
//! and closes the connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gateway_core::transport::{EventKind, TransportKind};

use crate::model::AuthContext;
use crate::router::RequestScope;

use super::{auth_context, SharedState};

/// `GET /ws`: gateway-scoped WebSocket.
pub async fn handle_ws(
    State(state): State<SharedState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let auth = auth_context(&state, &headers, None, None);
    upgrade.on_upgrade(move |socket| run_socket(state, auth, socket))
}

/// `GET /servers/{id}/ws`: WebSocket bound to one backend.
pub async fn handle_server_ws(
    State(state): State<SharedState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let auth = auth_context(&state, &headers, Some(server_id), None);
    upgrade.on_upgrade(move |socket| run_socket(state, auth, socket))
}

async fn run_socket(state: SharedState, auth: AuthContext, socket: WebSocket) {
    let handle = match state
        .manager
        .create_connection(
            TransportKind::Websocket,
            &auth.user_id,
            &auth.organization_id,
            auth.server_id.clone(),
            None,
        )
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            warn!("websocket session open failed: {e}");
            return;
        }
    };
    let session_id = handle.session.id.clone();
    debug!(session_id, "websocket connected");

    let cancel = CancellationToken::new();
    let scope = RequestScope {
        auth,
        cancel: cancel.clone(),
    };

    let (mut sink, mut inbound) = socket.split();
    let mut events = handle.session.subscribe();

    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !dispatch_frame(&state, &scope, text.as_bytes(), &mut sink).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if !dispatch_frame(&state, &scope, &bytes, &mut sink).await {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(session_id, "websocket read error: {e}");
                    break;
                }
            },
            event = events.recv() => {
                if let Ok(event) = event {
                    if event.kind == EventKind::Message
                        && sink.send(Message::Text(event.data.to_string())).await.is_err()
                    {
                        break;
                    }
                }
            }
        }
        handle.session.touch().await;
    }

    // Abort any forward still in flight, then release the session.
    cancel.cancel();
    if let Err(e) = state.manager.close_connection(&session_id).await {
        debug!(session_id, "websocket close: {e}");
    }
    debug!(session_id, "websocket disconnected");
}

/// Route one frame; returns false when the sink has gone away.
async fn dispatch_frame(
    state: &SharedState,
    scope: &RequestScope,
    payload: &[u8],
    sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
) -> bool {
    let outcome = state.router.dispatch(scope, payload).await;
    match outcome.to_body() {
        Some(body) => sink.send(Message::Text(body.to_string())).await.is_ok(),
        None => true,
    }
}
