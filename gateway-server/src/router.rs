//! JSON-RPC router: validation, built-ins, and backend dispatch.
//!
//! Every inbound payload passes through here regardless of which wire it
//! arrived on. Dispatch order for a request:
//!
//! 1. gateway built-ins (`ping`, `gateway/info`) answer locally;
//! 2. with no bound server, the MCP surface goes to the namespace
//!    aggregator (`initialize` is answered by the gateway itself);
//! 3. with a bound server, the envelope is forwarded verbatim and the
//!    backend's response comes back untouched, id preserved.
//!
//! Batches are processed in declaration order, each element independent;
//! notifications produce no response entry. Idempotent reads retry with
//! exponential backoff and jitter; `tools/call` never retries.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use gateway_core::error::GatewayError;
use gateway_core::messages::{
    CallToolParams, InboundCall, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, RpcPayload,
};

use crate::backend::BackendPool;
use crate::discovery::DiscoveryRegistry;
use crate::manager::TransportManager;
use crate::model::AuthContext;
use crate::namespace::NamespaceAggregator;

/// Base delay of the retry backoff schedule.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Namespace used when the caller's endpoint does not name one.
const DEFAULT_NAMESPACE: &str = "default";

/// Methods safe to retry: reads with no side effects. `tools/call` is
/// deliberately absent.
const IDEMPOTENT_METHODS: &[&str] = &[
    "initialize",
    "ping",
    "tools/list",
    "resources/list",
    "resources/read",
    "prompts/list",
    "prompts/get",
];

/// One request's routing context: identity plus cancellation.
#[derive(Clone)]
pub struct RequestScope {
    /// Caller identity from the auth collaborator.
    pub auth: AuthContext,
    /// Cancelled when the client goes away.
    pub cancel: CancellationToken,
}

impl RequestScope {
    /// Scope with a never-cancelled token.
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of routing one payload.
#[derive(Debug)]
pub enum RpcOutcome {
    /// One response to serialize.
    Single(JsonRpcResponse),
    /// Batch responses, requested ids in declaration order.
    Batch(Vec<JsonRpcResponse>),
    /// Nothing to answer (all notifications): empty body / 204.
    Empty,
}

/// The gateway's JSON-RPC dispatcher.
pub struct RpcRouter {
    gateway_name: String,
    gateway_version: String,
    discovery: DiscoveryRegistry,
    aggregator: Arc<NamespaceAggregator>,
    pool: Arc<BackendPool>,
    manager: Arc<TransportManager>,
}

impl RpcRouter {
    /// Wire up a router.
    pub fn new(
        gateway_name: impl Into<String>,
        discovery: DiscoveryRegistry,
        aggregator: Arc<NamespaceAggregator>,
        pool: Arc<BackendPool>,
        manager: Arc<TransportManager>,
    ) -> Self {
        Self {
            gateway_name: gateway_name.into(),
            gateway_version: env!("CARGO_PKG_VERSION").to_string(),
            discovery,
            aggregator,
            pool,
            manager,
        }
    }

    /// Route a raw body: single request or batch.
    pub async fn dispatch(&self, scope: &RequestScope, body: &[u8]) -> RpcOutcome {
        let payload = match RpcPayload::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                return RpcOutcome::Single(JsonRpcResponse::error(
                    RequestId::Null,
                    e.to_rpc_error(),
                ))
            }
        };

        match payload {
            RpcPayload::Single(call) => match self.handle_call(scope, call).await {
                Some(response) => RpcOutcome::Single(response),
                None => RpcOutcome::Empty,
            },
            RpcPayload::Batch(calls) => {
                let mut responses = Vec::with_capacity(calls.len());
                for call in calls {
                    if let Some(response) = self.handle_call(scope, call).await {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    RpcOutcome::Empty
                } else {
                    RpcOutcome::Batch(responses)
                }
            }
        }
    }

    /// Route one decoded call. Notifications yield no response.
    async fn handle_call(
        &self,
        scope: &RequestScope,
        call: InboundCall,
    ) -> Option<JsonRpcResponse> {
        match call {
            // The decoder already picked the right code (−32600 for a
            // broken envelope, −32602 for misshapen params).
            InboundCall::Invalid { id, error } => Some(JsonRpcResponse::error(
                id.unwrap_or(RequestId::Null),
                error,
            )),
            InboundCall::Notification(notification) => {
                self.handle_notification(scope, notification).await;
                None
            }
            InboundCall::Request(request) => Some(self.handle_request(scope, request).await),
        }
    }

    /// Notifications are forwarded best-effort to a bound server and
    /// otherwise acknowledged silently.
    async fn handle_notification(&self, scope: &RequestScope, notification: JsonRpcNotification) {
        let Some(server_id) = scope.auth.server_id.as_deref() else {
            debug!(method = %notification.method, "gateway-scoped notification absorbed");
            return;
        };
        let server = match self.discovery.get_routable(server_id).await {
            Ok(server) => server,
            Err(e) => {
                warn!(server_id, "dropping notification for unroutable server: {e}");
                return;
            }
        };
        let result = async {
            let transport = self.pool.get_or_open(&server).await?;
            let mut transport = transport.lock().await;
            transport
                .send(gateway_core::messages::JsonRpcMessage::Notification(
                    notification,
                ))
                .await
        }
        .await;
        if let Err(e) = result {
            warn!(server_id, "notification forward failed: {e}");
        }
    }

    /// Route one request to a built-in, the aggregator, or a backend.
    async fn handle_request(
        &self,
        scope: &RequestScope,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = request.id.clone();

        // Built-ins answer locally on every scope.
        match request.method.as_str() {
            "ping" => return JsonRpcResponse::success(id, json!({})),
            "gateway/info" => return self.gateway_info(id).await,
            _ => {}
        }

        if let Some(server_id) = scope.auth.server_id.clone() {
            return self.forward_to_server(scope, &server_id, request).await;
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(&request),
            "tools/list" => {
                let namespace = self.namespace_for(scope);
                match self
                    .aggregator
                    .list_tools(&scope.auth.organization_id, &namespace)
                    .await
                {
                    Ok(result) => match serde_json::to_value(&result) {
                        Ok(value) => JsonRpcResponse::success(id, value),
                        Err(e) => self.error_response(id, e.into()),
                    },
                    Err(e) => self.error_response(id, e),
                }
            }
            "tools/call" => {
                let params: CallToolParams = match request.params_as() {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(
                            id,
                            JsonRpcError::invalid_params(e.to_string()),
                        )
                    }
                };
                let namespace = self.namespace_for(scope);
                match self
                    .aggregator
                    .call_tool(&scope.auth.organization_id, &namespace, id.clone(), params)
                    .await
                {
                    Ok(response) => response,
                    Err(e) => self.error_response(id, e),
                }
            }
            // The gateway aggregates tools only; the other MCP surfaces
            // answer empty rather than erroring so inspectors keep working.
            "resources/list" => JsonRpcResponse::success(id, json!({ "resources": [] })),
            "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        }
    }

    fn handle_initialize(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = request.params_as().unwrap_or(InitializeParams {
            protocol_version: None,
            capabilities: None,
            client_info: None,
        });
        let result = InitializeResult::for_gateway(
            &self.gateway_name,
            &self.gateway_version,
            params.protocol_version.as_deref(),
        );
        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(request.id.clone(), value),
            Err(e) => self.error_response(request.id.clone(), e.into()),
        }
    }

    async fn gateway_info(&self, id: RequestId) -> JsonRpcResponse {
        let metrics = self.manager.metrics().await;
        JsonRpcResponse::success(
            id,
            json!({
                "name": self.gateway_name,
                "version": self.gateway_version,
                "transports": gateway_core::transport::TransportFactory::supported(),
                "metrics": metrics,
                "discovery": self.discovery.summary().await,
            }),
        )
    }

    /// Forward an envelope to a bound backend, verbatim, with retries for
    /// idempotent reads and cancellation mapped to −32002.
    async fn forward_to_server(
        &self,
        scope: &RequestScope,
        server_id: &str,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        let server = match self.discovery.get_routable(server_id).await {
            Ok(server) => server,
            Err(e) => return self.error_response(id, e),
        };

        let budget = if IDEMPOTENT_METHODS.contains(&request.method.as_str()) {
            server.max_retries
        } else {
            0
        };

        let mut attempt = 0u32;
        loop {
            let forwarded = request.clone();
            let outcome = tokio::select! {
                _ = scope.cancel.cancelled() => {
                    // The caller is gone; release the child wire too.
                    self.pool.invalidate(&server.id).await;
                    return self.error_response(
                        id,
                        GatewayError::cancelled(format!("forward to {}", server.name)),
                    );
                }
                outcome = self.pool.request(&server, &self.discovery, forwarded, None) => outcome,
            };

            match outcome {
                Ok(response) => return response,
                Err(e) if e.is_retryable() && attempt < budget => {
                    let delay = backoff_delay(attempt);
                    debug!(
                        server = %server.name,
                        attempt,
                        "retrying idempotent call in {delay:?} after: {e}"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = scope.cancel.cancelled() => {
                            return self.error_response(
                                id,
                                GatewayError::cancelled(format!("forward to {}", server.name)),
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return self.error_response(id, e),
            }
        }
    }

    fn namespace_for(&self, scope: &RequestScope) -> String {
        scope
            .auth
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    /// Log the full cause, answer with the sanitized wire form.
    fn error_response(&self, id: RequestId, error: GatewayError) -> JsonRpcResponse {
        error!(category = error.category(), "request failed: {error}");
        JsonRpcResponse::error(id, error.to_rpc_error())
    }
}

/// Exponential backoff with ±20% jitter: base 100ms, factor 2.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((base as f64 * jitter) as u64)
}

impl RpcOutcome {
    /// JSON value for the body, when there is one.
    pub fn to_body(&self) -> Option<serde_json::Value> {
        match self {
            RpcOutcome::Single(response) => serde_json::to_value(response).ok(),
            RpcOutcome::Batch(responses) => serde_json::to_value(responses).ok(),
            RpcOutcome::Empty => None,
        }
    }

    /// HTTP status code for this outcome.
    ///
    /// A single error response carries the status its code maps to
    /// (400 for structural rejections, 500 internal, 499 cancelled,
    /// 200 for routed errors); batches are always 200 and an
    /// all-notification payload is 204.
    pub fn http_status(&self) -> u16 {
        match self {
            RpcOutcome::Empty => 204,
            RpcOutcome::Single(response) => match &response.error {
                Some(error) => gateway_core::error::http_status_for_code(error.code),
                None => 200,
            },
            RpcOutcome::Batch(_) => 200,
        }
    }
}
