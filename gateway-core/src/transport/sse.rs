//! SSE transport: a long-lived event stream plus a POST side channel.
//!
//! Connecting opens a GET stream decoded with `eventsource-stream`. A
//! background reader pumps frames into the inbound event channel and
//! fulfils pending request correlations. The reader remembers the last
//! SSE event id and reconnects with `Last-Event-ID` so a blip in the
//! stream does not lose events the backend buffered.
//!
//! Outbound messages go over POST to the same endpoint; backends either
//! answer the POST directly with JSON or push the response onto the
//! stream, and `request()` accepts both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Capability, EventKind, Transport, TransportEvent, TransportKind, TransportStatus};
use crate::error::{GatewayError, GatewayResult, TransportError};
use crate::messages::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::transport::config::HttpConfig;

/// Delay between stream reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// SSE client transport.
pub struct SseTransport {
    config: HttpConfig,
    client: Client,
    status: TransportStatus,
    session_id: Option<String>,
    pending: PendingMap,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl SseTransport {
    /// Create a transport for the given stream endpoint.
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            status: TransportStatus::new(TransportKind::Sse),
            session_id: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            events_rx: None,
            reader: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_reader(&self, events_tx: mpsc::UnboundedSender<TransportEvent>) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = self.config.url.clone();
        let headers = self.config.headers.clone();
        let pending = Arc::clone(&self.pending);
        let closed = Arc::clone(&self.closed);

        tokio::spawn(async move {
            let mut last_event_id: Option<String> = None;

            while !closed.load(Ordering::SeqCst) {
                let mut builder = client
                    .get(url.clone())
                    .header("Accept", "text/event-stream");
                for (key, value) in &headers {
                    builder = builder.header(key, value);
                }
                if let Some(ref id) = last_event_id {
                    builder = builder.header("Last-Event-ID", id.clone());
                }

                let response = match builder.send().await {
                    Ok(r) if r.status().is_success() => r,
                    Ok(r) => {
                        warn!(status = %r.status(), "sse stream rejected");
                        let _ = events_tx
                            .send(TransportEvent::error(format!("sse stream rejected: {}", r.status())));
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                    Err(e) => {
                        warn!("sse stream connect failed: {e}");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };

                let mut stream = response.bytes_stream().eventsource();
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(event) => {
                            if !event.id.is_empty() {
                                last_event_id = Some(event.id.clone());
                            }
                            match event.event.as_str() {
                                "ping" => {
                                    let _ = events_tx.send(TransportEvent::new(
                                        EventKind::Ping,
                                        serde_json::Value::Null,
                                    ));
                                }
                                _ => {
                                    dispatch_frame(&event.data, &pending, &events_tx).await;
                                }
                            }
                        }
                        Err(e) => {
                            debug!("sse stream broke: {e}");
                            break;
                        }
                    }
                }

                if closed.load(Ordering::SeqCst) {
                    break;
                }
                // Stream ended without us closing; resume from the last id.
                tokio::time::sleep(RECONNECT_DELAY).await;
            }

            let _ = events_tx.send(TransportEvent::close());
            debug!("sse reader task finished");
        })
    }

    async fn post_envelope(&self, message: &JsonRpcMessage) -> GatewayResult<Option<String>> {
        let body = serde_json::to_string(message)?;

        let mut builder = self
            .client
            .post(self.config.url.clone())
            .header("Content-Type", "application/json")
            .timeout(self.config.timeout)
            .body(body);
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                reason: text,
            }
            .into());
        }
        Ok((!text.trim().is_empty()).then_some(text))
    }
}

/// Route one decoded SSE data frame: responses fulfil pending requests,
/// everything else becomes an inbound event.
async fn dispatch_frame(
    data: &str,
    pending: &PendingMap,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
) {
    match serde_json::from_str::<JsonRpcMessage>(data) {
        Ok(JsonRpcMessage::Response(response)) => {
            let waiter = pending.lock().await.remove(&response.id.to_string());
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => {
                    let _ = events_tx
                        .send(TransportEvent::message(&JsonRpcMessage::Response(response)));
                }
            }
        }
        Ok(message) => {
            let _ = events_tx.send(TransportEvent::message(&message));
        }
        Err(_) => {
            // Non-JSON frames (endpoint announcements, comments) are kept
            // visible as custom events.
            let _ = events_tx.send(TransportEvent::new(
                EventKind::Custom,
                serde_json::Value::String(data.to_string()),
            ));
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        self.closed.store(false, Ordering::SeqCst);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::new(
            EventKind::Connected,
            serde_json::Value::Null,
        ));
        self.reader = Some(self.spawn_reader(events_tx));
        self.events_rx = Some(events_rx);
        self.status.mark_connected();
        Ok(())
    }

    async fn close(&mut self) -> GatewayResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events_rx = None;
        self.pending.lock().await.clear();
        self.status.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    async fn send(&mut self, message: JsonRpcMessage) -> GatewayResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected {
                transport_type: "sse",
            }
            .into());
        }
        let bytes = serde_json::to_string(&message)?.len();
        self.post_envelope(&message).await?;
        self.status.record_sent(bytes);
        Ok(())
    }

    async fn request(
        &mut self,
        request: JsonRpcRequest,
        timeout_duration: Option<Duration>,
    ) -> GatewayResult<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected {
                transport_type: "sse",
            }
            .into());
        }

        let deadline = timeout_duration.unwrap_or(self.config.timeout);
        let request_id = request.id.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let message = JsonRpcMessage::Request(request);
        let direct = match self.post_envelope(&message).await {
            Ok(direct) => direct,
            Err(e) => {
                self.pending.lock().await.remove(&request_id);
                return Err(e);
            }
        };

        // Some backends answer the POST body directly instead of pushing
        // the response onto the stream.
        if let Some(body) = direct {
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&body) {
                self.pending.lock().await.remove(&request_id);
                return Ok(response);
            }
        }

        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.status.record_error();
                Err(TransportError::ReceiveFailed {
                    transport_type: "sse",
                    reason: "stream closed before the response arrived".to_string(),
                }
                .into())
            }
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                self.status.record_error();
                Err(GatewayError::timeout(
                    format!("sse request {request_id}"),
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
        self.client
            .get(self.config.url.clone())
            .header("Accept", "text/event-stream")
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        Ok(())
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Replay, Capability::Stateful]
    }

    fn status(&self) -> TransportStatus {
        let mut status = self.status.clone();
        status.add_metadata("url", serde_json::json!(self.config.url.as_str()));
        status
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn connected_event_arrives_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"tick\"}\n\n"),
            )
            .mount(&server)
            .await;

        let mut transport =
            SseTransport::new(HttpConfig::new(server.uri().parse().unwrap()));
        transport.connect().await.unwrap();

        let first = timeout(Duration::from_secs(5), transport.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.kind, EventKind::Connected);

        let second = timeout(Duration::from_secs(5), transport.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.kind, EventKind::Message);
        assert_eq!(second.data["method"], json!("tick"));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn request_accepts_direct_post_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(": keepalive\n\n"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 3, "result": {"pong": true}
            })))
            .mount(&server)
            .await;

        let mut transport =
            SseTransport::new(HttpConfig::new(server.uri().parse().unwrap()));
        transport.connect().await.unwrap();

        let response = transport
            .request(JsonRpcRequest::new(3, "ping", json!({})), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["pong"], json!(true));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_ends_the_event_sequence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(": keepalive\n\n"),
            )
            .mount(&server)
            .await;

        let mut transport =
            SseTransport::new(HttpConfig::new(server.uri().parse().unwrap()));
        transport.connect().await.unwrap();
        transport.close().await.unwrap();

        assert!(!transport.is_connected());
        assert!(transport.receive().await.unwrap().is_none());
    }
}
