//! The gateway's wire surface.
//!
//! One axum router serves every client-facing endpoint: JSON-RPC over
//! plain POST, SSE streams with replay, WebSocket upgrade, the dual-mode
//! streamable endpoint, and the stdio process controls. CORS and request
//! tracing wrap the whole surface.

pub mod openapi;
pub mod rpc;
pub mod sse;
pub mod stdio_ops;
pub mod streamable;
pub mod ws;

use std::sync::Arc;

use axum::http::{header::HeaderValue, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gateway_core::error::GatewayError;

use crate::config::{CorsConfig, GatewayConfig, ZERO_ORG};
use crate::discovery::DiscoveryRegistry;
use crate::manager::TransportManager;
use crate::model::AuthContext;
use crate::namespace::NamespaceAggregator;
use crate::router::RpcRouter;
use crate::session::SessionRegistry;
use crate::supervisor::ProcessSupervisor;

/// Everything the handlers need, shared once.
pub struct AppState {
    /// Daemon configuration.
    pub config: GatewayConfig,
    /// Session registry (also reachable through the manager).
    pub sessions: SessionRegistry,
    /// Connection manager.
    pub manager: Arc<TransportManager>,
    /// Server index and health.
    pub discovery: DiscoveryRegistry,
    /// JSON-RPC dispatcher.
    pub router: Arc<RpcRouter>,
    /// Namespace aggregation.
    pub aggregator: Arc<NamespaceAggregator>,
    /// Long-lived stdio processes.
    pub supervisor: Arc<ProcessSupervisor>,
}

/// Shared handle to the app state.
pub type SharedState = Arc<AppState>;

/// Build the full wire router.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .route("/health", get(health))
        // Gateway-scoped and server-scoped JSON-RPC.
        .route("/rpc", post(rpc::handle_rpc))
        .route("/servers/:server_id/rpc", post(rpc::handle_server_rpc))
        // SSE streams.
        .route("/sse", get(sse::handle_sse))
        .route("/servers/:server_id/sse", get(sse::handle_server_sse))
        // WebSocket upgrade.
        .route("/ws", get(ws::handle_ws))
        .route("/servers/:server_id/ws", get(ws::handle_server_ws))
        // Streamable HTTP, JSON or SSE by Accept.
        .route(
            "/mcp",
            get(streamable::handle_get)
                .post(streamable::handle_post)
                .head(streamable::handle_head)
                .options(streamable::handle_options),
        )
        .route(
            "/servers/:server_id/mcp",
            get(streamable::handle_server_get)
                .post(streamable::handle_server_post)
                .head(streamable::handle_head)
                .options(streamable::handle_options),
        )
        // Stdio process control.
        .route("/stdio/execute", post(stdio_ops::handle_execute))
        .route(
            "/stdio/process",
            get(stdio_ops::handle_process).post(stdio_ops::handle_process),
        )
        // Namespace OpenAPI surface.
        .route("/mcp/:endpoint/openapi.json", get(openapi::handle_spec))
        .route("/mcp/:endpoint/docs", get(openapi::handle_docs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<SharedState>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.config.gateway_name,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len().await,
    }))
}

/// Build the CORS layer from the configured policy vector.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let layer = CorsLayer::new().allow_methods(methods).allow_headers(Any);
    if config.allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

/// Resolve the caller identity the auth collaborator left in headers.
///
/// Single-tenant deployments pin the organization to the zero UUID; the
/// identity headers are optional everywhere else.
pub(crate) fn auth_context(
    state: &AppState,
    headers: &HeaderMap,
    server_id: Option<String>,
    endpoint: Option<String>,
) -> AuthContext {
    let user_id = header_str(headers, "x-user-id").unwrap_or_else(|| "anonymous".to_string());
    let organization_id = if state.config.single_tenant {
        ZERO_ORG.to_string()
    } else {
        header_str(headers, "x-organization-id").unwrap_or_else(|| ZERO_ORG.to_string())
    };
    let endpoint = endpoint.or_else(|| header_str(headers, "x-mcp-namespace"));

    AuthContext {
        user_id,
        organization_id,
        server_id,
        endpoint,
    }
}

pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Render a gateway error as an HTTP reply with a JSON body.
pub(crate) fn error_reply(error: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::error!(category = error.category(), "request rejected: {error}");
    (
        status,
        Json(serde_json::json!({ "error": error.sanitized_message() })),
    )
        .into_response()
}
