//! HTTP transport: plain request/response against a backend MCP endpoint.
//!
//! Each call is one POST carrying one envelope. The transport is
//! stateless on our side; when the backend runs in streamable mode and
//! allocates a session, the `mcp-session-id` response header is captured
//! and replayed on subsequent requests. Backends that answer a POST with
//! a one-shot `text/event-stream` body are handled by scanning the SSE
//! frames for the JSON-RPC response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::timeout;
use tracing::debug;

use super::{Capability, Transport, TransportEvent, TransportKind, TransportStatus};
use crate::error::{GatewayError, GatewayResult, TransportError};
use crate::messages::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::transport::config::HttpConfig;

/// Request/response HTTP transport.
pub struct HttpTransport {
    config: HttpConfig,
    client: Client,
    status: TransportStatus,
    session_id: Option<String>,
    /// Session id the backend allocated for us, if it runs stateful.
    backend_session: Option<String>,
    connected: bool,
}

impl HttpTransport {
    /// Create a transport for the given endpoint.
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            status: TransportStatus::new(TransportKind::Http),
            session_id: None,
            backend_session: None,
            connected: false,
        }
    }

    /// POST one envelope and return the raw response body.
    async fn post_envelope(&mut self, message: &JsonRpcMessage) -> GatewayResult<String> {
        let body = serde_json::to_string(message)?;
        let bytes_out = body.len();

        let mut builder = self
            .client
            .post(self.config.url.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .timeout(self.config.timeout)
            .body(body);

        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }
        if let Some(ref session) = self.backend_session {
            builder = builder.header("mcp-session-id", session);
        }

        let response = builder.send().await?;

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            if self.backend_session.as_deref() != Some(session) {
                debug!(session, "backend allocated streamable session");
                self.backend_session = Some(session.to_string());
            }
        }

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            self.status.record_error();
            return Err(TransportError::Http {
                status: status.as_u16(),
                reason: text,
            }
            .into());
        }

        self.status.record_sent(bytes_out);
        self.status.record_received(text.len());
        Ok(text)
    }

    /// Parse a response body that may be JSON or a one-shot SSE stream.
    fn parse_response(&self, body: &str) -> GatewayResult<JsonRpcResponse> {
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(body) {
            return Ok(response);
        }

        // Streamable backends answer POSTs with a short SSE body; the
        // response is the first data frame carrying an id.
        for line in body.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data.trim()) {
                    return Ok(response);
                }
            }
        }

        Err(TransportError::ReceiveFailed {
            transport_type: "http",
            reason: format!("body is neither a JSON-RPC response nor SSE: {body:.120}"),
        }
        .into())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        // No persistent wire to establish; validity is checked per request.
        self.connected = true;
        self.status.mark_connected();
        Ok(())
    }

    async fn close(&mut self) -> GatewayResult<()> {
        self.connected = false;
        self.backend_session = None;
        self.status.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, message: JsonRpcMessage) -> GatewayResult<()> {
        if !self.connected {
            return Err(TransportError::NotConnected {
                transport_type: "http",
            }
            .into());
        }
        self.post_envelope(&message).await?;
        Ok(())
    }

    async fn request(
        &mut self,
        request: JsonRpcRequest,
        timeout_duration: Option<Duration>,
    ) -> GatewayResult<JsonRpcResponse> {
        if !self.connected {
            return Err(TransportError::NotConnected {
                transport_type: "http",
            }
            .into());
        }

        let deadline = timeout_duration.unwrap_or(self.config.timeout);
        let request_id = request.id.to_string();
        let message = JsonRpcMessage::Request(request);

        let body = timeout(deadline, self.post_envelope(&message))
            .await
            .map_err(|_| GatewayError::timeout(format!("http request {request_id}"), deadline))??;

        self.parse_response(&body)
    }

    async fn receive(&mut self) -> GatewayResult<Option<TransportEvent>> {
        // Request/response only: there is no inbound stream.
        Ok(None)
    }

    fn set_session_id(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    async fn health_check(&mut self) -> GatewayResult<()> {
        // Reachability is enough here; HTTP status semantics belong to the
        // discovery probes.
        self.client
            .get(self.config.url.clone())
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        Ok(())
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    fn status(&self) -> TransportStatus {
        let mut status = self.status.clone();
        status.add_metadata("url", serde_json::json!(self.config.url.as_str()));
        status.add_metadata(
            "backend_session",
            serde_json::json!(self.backend_session),
        );
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        let config = HttpConfig::new(format!("{}/mcp", server.uri()).parse().unwrap());
        HttpTransport::new(config)
    }

    #[tokio::test]
    async fn request_round_trips_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": {"ok": true}
            })))
            .mount(&server)
            .await;

        let mut transport = transport_for(&server);
        transport.connect().await.unwrap();

        let response = transport
            .request(JsonRpcRequest::new(1, "ping", json!({})), None)
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.id.to_string(), "1");
    }

    #[tokio::test]
    async fn error_responses_are_preserved_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 4,
                "error": {"code": -32601, "message": "Method not found"}
            })))
            .mount(&server)
            .await;

        let mut transport = transport_for(&server);
        transport.connect().await.unwrap();

        let response = transport
            .request(JsonRpcRequest::new(4, "nope", json!({})), None)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn one_shot_sse_bodies_are_decoded() {
        let server = MockServer::start().await;
        let sse_body =
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[]}}\n\n";
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .mount(&server)
            .await;

        let mut transport = transport_for(&server);
        transport.connect().await.unwrap();

        let response = transport
            .request(JsonRpcRequest::new(2, "tools/list", json!({})), None)
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["tools"], json!([]));
    }

    #[tokio::test]
    async fn backend_session_header_is_captured_and_replayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "sess-1")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("mcp-session-id", "sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 2, "result": {"resumed": true}
            })))
            .mount(&server)
            .await;

        let mut transport = transport_for(&server);
        transport.connect().await.unwrap();

        transport
            .request(JsonRpcRequest::new(1, "initialize", json!({})), None)
            .await
            .unwrap();
        let second = transport
            .request(JsonRpcRequest::new(2, "ping", json!({})), None)
            .await
            .unwrap();
        assert_eq!(second.result.unwrap()["resumed"], json!(true));
    }

    #[tokio::test]
    async fn backend_5xx_maps_to_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let mut transport = transport_for(&server);
        transport.connect().await.unwrap();

        let err = transport
            .request(JsonRpcRequest::new(1, "ping", json!({})), None)
            .await
            .unwrap_err();
        match err {
            GatewayError::Transport(TransportError::Http { status, .. }) => {
                assert_eq!(status, 502);
            }
            other => panic!("expected http error, got {other}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn send_requires_connect() {
        let server = MockServer::start().await;
        let mut transport = transport_for(&server);
        let err = transport
            .send(JsonRpcMessage::Request(JsonRpcRequest::new(
                1,
                "ping",
                json!({}),
            )))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Transport(TransportError::NotConnected { .. })
        ));
    }
}
