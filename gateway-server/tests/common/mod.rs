//! Shared helpers for gateway integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use gateway_server::config::GatewayConfig;
use gateway_server::http::{self, SharedState};
use gateway_server::model::{
    BackendServer, MappingStatus, Namespace, NamespaceServer, ServerProtocol,
};
use gateway_server::repository::{
    LoggingToolDiscovery, MemoryHealthCheckRepository, MemoryNamespaceRepository,
    MemoryServerRepository, Repositories,
};
use gateway_server::Gateway;

/// A wired gateway plus concrete repository handles for test setup.
pub struct TestGateway {
    pub gateway: Gateway,
    pub state: SharedState,
    pub namespaces: Arc<MemoryNamespaceRepository>,
}

/// Build a single-tenant gateway over in-memory repositories.
pub async fn test_gateway() -> TestGateway {
    test_gateway_with(GatewayConfig {
        single_tenant: true,
        ..Default::default()
    })
    .await
}

/// Same, with a custom config.
pub async fn test_gateway_with(config: GatewayConfig) -> TestGateway {
    let namespaces = Arc::new(MemoryNamespaceRepository::new());
    let repos = Repositories {
        servers: Arc::new(MemoryServerRepository::new()),
        health: Arc::new(MemoryHealthCheckRepository::new()),
        namespaces: Arc::clone(&namespaces) as Arc<_>,
        tool_discovery: Arc::new(LoggingToolDiscovery),
    };

    let gateway = Gateway::build(config, repos).await.expect("gateway build");
    let state = gateway.state.clone();
    TestGateway {
        gateway,
        state,
        namespaces,
    }
}

impl TestGateway {
    /// Register an HTTP backend pointing at `url` and return its id.
    pub async fn register_http(&self, org: &str, name: &str, url: &str) -> String {
        let server = BackendServer::new_url(org, name, ServerProtocol::Http, url);
        self.state
            .discovery
            .register(server)
            .await
            .expect("register server")
    }

    /// Register a stdio backend and return its id.
    pub async fn register_stdio(
        &self,
        org: &str,
        name: &str,
        command: &str,
        args: Vec<String>,
    ) -> String {
        let server = BackendServer::new_stdio(org, name, command, args);
        self.state
            .discovery
            .register(server)
            .await
            .expect("register server")
    }

    /// Map servers into a namespace visible to the aggregator.
    pub async fn put_namespace(&self, org: &str, name: &str, server_ids: &[&str]) -> String {
        let mut namespace = Namespace::new(org, name);
        for (priority, server_id) in server_ids.iter().enumerate() {
            namespace.servers.push(NamespaceServer {
                server_id: (*server_id).to_string(),
                priority: priority as i32,
                status: MappingStatus::Active,
            });
        }
        let id = namespace.id.clone();
        self.namespaces.put(namespace).await;
        id
    }

    /// Serve the wire surface on an ephemeral port, returning its base URL.
    pub async fn serve(&self) -> String {
        let router = http::build_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }
}

/// Mount a tools/list + tools/call MCP backend on a wiremock server.
pub async fn mount_mcp_backend(server: &wiremock::MockServer, tools: &[&str]) {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, ResponseTemplate};

    let tool_list: Vec<serde_json::Value> = tools
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "description": format!("{name} tool"),
                "inputSchema": { "type": "object" }
            })
        })
        .collect();

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(move |request: &wiremock::Request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "result": { "tools": tool_list }
            }))
        })
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(move |request: &wiremock::Request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "result": {
                    "called": body["params"]["name"],
                    "arguments": body["params"]["arguments"],
                }
            }))
        })
        .mount(server)
        .await;
}
