//! WebSocket transport: full-duplex JSON-RPC over text frames.
//!
//! The connection is split once: the write half lives behind a mutex so
//! sends serialize, the read half is pumped by a background task that
//! correlates responses and surfaces everything else as events. Protocol
//! ping/pong frames map onto `ping`/`pong` events; a close frame ends the
//! event sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{Capability, EventKind, Transport, TransportEvent, TransportKind, TransportStatus};
use crate::error::{GatewayError, GatewayResult, TransportError};
use crate::messages::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::transport::config::HttpConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// WebSocket client transport.
pub struct WebSocketTransport {
    config: HttpConfig,
    status: TransportStatus,
    session_id: Option<String>,
    pending: PendingMap,
    sink: Option<WsSink>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Create a transport for the given `ws://`/`wss://` endpoint.
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            status: TransportStatus::new(TransportKind::Websocket),
            session_id: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            sink: None,
            events_rx: None,
            reader: None,
        }
    }

    /// The endpoint with http(s) schemes rewritten to ws(s).
    fn ws_url(&self) -> String {
        let url = self.config.url.as_str();
        if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            url.to_string()
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        if self.sink.is_some() {
            return Ok(());
        }

        let url = self.ws_url();
        let (stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    transport_type: "websocket",
                    reason: e.to_string(),
                })?;
        let (sink, mut reader) = stream.split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::new(
            EventKind::Connected,
            serde_json::Value::Null,
        ));

        let pending = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<JsonRpcMessage>(&text) {
                            Ok(JsonRpcMessage::Response(response)) => {
                                let waiter =
                                    pending.lock().await.remove(&response.id.to_string());
                                match waiter {
                                    Some(tx) => {
                                        let _ = tx.send(response);
                                    }
                                    None => {
                                        let _ = events_tx.send(TransportEvent::message(
                                            &JsonRpcMessage::Response(response),
                                        ));
                                    }
                                }
                            }
                            Ok(message) => {
                                let _ = events_tx.send(TransportEvent::message(&message));
                            }
                            Err(e) => {
                                warn!("unparseable websocket text frame: {e}");
                            }
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        // Binary frames carry JSON just the same for
                        // backends that prefer them.
                        if let Ok(message) = serde_json::from_slice::<JsonRpcMessage>(&bytes) {
                            let _ = events_tx.send(TransportEvent::message(&message));
                        }
                    }
                    Ok(Message::Ping(_)) => {
                        let _ = events_tx
                            .send(TransportEvent::new(EventKind::Ping, serde_json::Value::Null));
                    }
                    Ok(Message::Pong(_)) => {
                        let _ = events_tx
                            .send(TransportEvent::new(EventKind::Pong, serde_json::Value::Null));
                    }
                    Ok(Message::Close(frame)) => {
                        let code = frame.map(|f| u16::from(f.code));
                        let _ = events_tx.send(TransportEvent::new(
                            EventKind::Close,
                            serde_json::json!({ "code": code }),
                        ));
                        break;
                    }
                    Ok(Message::Frame(_)) => {}
                    Err(e) => {
                        let _ = events_tx.send(TransportEvent::error(e.to_string()));
                        break;
                    }
                }
            }
            debug!("websocket reader task finished");
        });

        self.sink = Some(Arc::new(Mutex::new(sink)));
        self.events_rx = Some(events_rx);
        self.reader = Some(handle);
        self.status.mark_connected();
        Ok(())
    }

    async fn close(&mut self) -> GatewayResult<()> {
        if let Some(sink) = self.sink.take() {
            let mut sink = sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events_rx = None;
        self.pending.lock().await.clear();
        self.status.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    async fn send(&mut self, message: JsonRpcMessage) -> GatewayResult<()> {
        let sink = self.sink.as_ref().ok_or(TransportError::NotConnected {
            transport_type: "websocket",
        })?;

        let text = serde_json::to_string(&message)?;
        let bytes = text.len();
        sink.lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed {
                transport_type: "websocket",
                reason: e.to_string(),
            })?;
        self.status.record_sent(bytes);
        Ok(())
    }

    async fn request(
        &mut self,
        request: JsonRpcRequest,
        timeout_duration: Option<Duration>,
    ) -> GatewayResult<JsonRpcResponse> {
        let deadline = timeout_duration.unwrap_or(self.config.timeout);
        let request_id = request.id.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(e) = self.send(JsonRpcMessage::Request(request)).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.status.record_error();
                Err(TransportError::ConnectionLost {
                    transport_type: "websocket",
                    reason: "connection closed before the response arrived".to_string(),
                }
                .into())
            }
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                self.status.record_error();
                Err(GatewayError::timeout(
                    format!("websocket request {request_id}"),
                    deadline,
                ))
            }
        }
    }

    async fn receive(&mut self) -> GatewayResult<Option<TransportEvent>> {
        let rx = match self.events_rx.as_mut() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        Ok(rx.recv().await)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    fn set_session_id(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    async fn health_check(&mut self) -> GatewayResult<()> {
        let sink = self.sink.as_ref().ok_or(TransportError::NotConnected {
            transport_type: "websocket",
        })?;
        sink.lock()
            .await
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::WebSocket {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Stateful]
    }

    fn status(&self) -> TransportStatus {
        let mut status = self.status.clone();
        status.add_metadata("url", serde_json::json!(self.ws_url()));
        status
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_schemes_are_rewritten() {
        let transport =
            WebSocketTransport::new(HttpConfig::new("http://backend/ws".parse().unwrap()));
        assert_eq!(transport.ws_url(), "ws://backend/ws");

        let secure =
            WebSocketTransport::new(HttpConfig::new("https://backend/ws".parse().unwrap()));
        assert_eq!(secure.ws_url(), "wss://backend/ws");
    }

    #[test]
    fn starts_disconnected() {
        let transport =
            WebSocketTransport::new(HttpConfig::new("ws://backend/ws".parse().unwrap()));
        assert!(!transport.is_connected());
        assert!(transport.supports(Capability::Stateful));
        assert!(!transport.supports(Capability::Pid));
    }

    #[tokio::test]
    async fn send_requires_connect() {
        let mut transport =
            WebSocketTransport::new(HttpConfig::new("ws://backend/ws".parse().unwrap()));
        let err = transport
            .send(JsonRpcMessage::Notification(
                crate::messages::JsonRpcNotification::without_params("ping"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Transport(TransportError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn round_trip_against_local_server() {
        use tokio::net::TcpListener;

        // Minimal echo-style server: answers every request with a result
        // envelope carrying the same id.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut reader) = ws.split();
            while let Some(Ok(Message::Text(text))) = reader.next().await {
                let request: JsonRpcRequest = serde_json::from_str(&text).unwrap();
                let response = JsonRpcResponse::success(
                    request.id,
                    serde_json::json!({"echoed": request.method}),
                );
                let _ = sink
                    .send(Message::Text(serde_json::to_string(&response).unwrap()))
                    .await;
            }
        });

        let config = HttpConfig::new(format!("ws://{addr}").parse().unwrap());
        let mut transport = WebSocketTransport::new(config);
        transport.connect().await.unwrap();

        let response = transport
            .request(
                JsonRpcRequest::new(11, "tools/list", serde_json::json!({})),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["echoed"], "tools/list");

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }
}
