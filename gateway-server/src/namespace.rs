//! Namespace tool aggregation.
//!
//! A namespace groups backend servers under one facade. `tools/list`
//! fans out across every active mapping in parallel (bounded by a worker
//! pool), prefixes each tool with its server's name, and tolerates
//! partial failure: a backend that errors simply contributes no tools.
//! Only when every backend fails does the aggregation itself fail.
//!
//! `tools/call` reverses the prefix, checks the mapping is active at both
//! the server and tool level, and forwards the call with the raw tool
//! name to the owning backend.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use gateway_core::error::{GatewayError, GatewayResult, ProtocolError};
use gateway_core::messages::{
    CallToolParams, JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId, Tool,
};

use crate::backend::BackendPool;
use crate::discovery::DiscoveryRegistry;
use crate::model::{BackendServer, MappingStatus, Namespace, ServerStatus};
use crate::repository::NamespaceRepository;

/// Separator between the server prefix and the raw tool name.
pub const TOOL_SEPARATOR: &str = "__";

/// Compose the aggregated name for a tool.
pub fn prefixed_name(server_name: &str, tool_name: &str) -> String {
    format!("{server_name}{TOOL_SEPARATOR}{tool_name}")
}

/// Split an aggregated name back into server and raw tool name.
pub fn split_prefixed(name: &str) -> Option<(&str, &str)> {
    name.split_once(TOOL_SEPARATOR)
}

/// Fan-out aggregator over one organization's namespaces.
pub struct NamespaceAggregator {
    namespaces: Arc<dyn NamespaceRepository>,
    discovery: DiscoveryRegistry,
    pool: Arc<BackendPool>,
    workers: Arc<Semaphore>,
}

impl NamespaceAggregator {
    /// Create an aggregator with the given worker bound.
    pub fn new(
        namespaces: Arc<dyn NamespaceRepository>,
        discovery: DiscoveryRegistry,
        pool: Arc<BackendPool>,
        max_workers: usize,
    ) -> Self {
        Self {
            namespaces,
            discovery,
            pool,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    async fn namespace(&self, org: &str, name: &str) -> GatewayResult<Namespace> {
        self.namespaces
            .get_with_servers(org, name)
            .await?
            .ok_or_else(|| GatewayError::NotFound {
                what: format!("namespace '{name}'"),
            })
    }

    /// Servers of a namespace that are mapped active, registered active,
    /// and not soft-deleted.
    async fn live_servers(&self, namespace: &Namespace) -> Vec<BackendServer> {
        let mut servers = Vec::new();
        for mapping in &namespace.servers {
            if mapping.status != MappingStatus::Active {
                continue;
            }
            if let Some(server) = self.discovery.get(&mapping.server_id).await {
                if server.is_active && server.status == ServerStatus::Active {
                    servers.push(server);
                }
            }
        }
        servers
    }

    /// Aggregate `tools/list` across a namespace.
    pub async fn list_tools(&self, org: &str, name: &str) -> GatewayResult<ListToolsResult> {
        let namespace = self.namespace(org, name).await?;
        let servers = self.live_servers(&namespace).await;
        if servers.is_empty() {
            return Ok(ListToolsResult::default());
        }
        let total = servers.len();

        let fetches = servers.into_iter().map(|server| {
            let pool = Arc::clone(&self.pool);
            let discovery = self.discovery.clone();
            let workers = Arc::clone(&self.workers);
            async move {
                let _permit = workers.acquire().await.ok()?;
                let request =
                    JsonRpcRequest::new(RequestId::random(), "tools/list", json!({}));
                match pool
                    .request(&server, &discovery, request, Some(server.timeout))
                    .await
                {
                    Ok(response) => match response.result {
                        Some(result) => match serde_json::from_value::<ListToolsResult>(result)
                        {
                            Ok(listed) => Some(Ok((server, listed.tools))),
                            Err(e) => Some(Err((
                                server.name,
                                format!("malformed tools/list result: {e}"),
                            ))),
                        },
                        None => {
                            let reason = response
                                .error
                                .map_or_else(|| "empty result".to_string(), |e| e.to_string());
                            Some(Err((server.name, reason)))
                        }
                    },
                    Err(e) => Some(Err((server.name, e.to_string()))),
                }
            }
        });

        let mut tools = Vec::new();
        let mut failures = Vec::new();
        for outcome in join_all(fetches).await.into_iter().flatten() {
            match outcome {
                Ok((server, listed)) => {
                    for tool in listed {
                        if namespace.tool_status(&server.id, &tool.name)
                            != MappingStatus::Active
                        {
                            debug!(server = %server.name, tool = %tool.name, "tool disabled");
                            continue;
                        }
                        tools.push(Tool {
                            name: prefixed_name(&server.name, &tool.name),
                            ..tool
                        });
                    }
                }
                Err((server_name, reason)) => {
                    warn!(server = %server_name, "tool listing failed: {reason}");
                    failures.push(format!("{server_name}: {reason}"));
                }
            }
        }

        if tools.is_empty() && failures.len() == total {
            return Err(GatewayError::internal(format!(
                "all backends failed: {}",
                failures.join("; ")
            )));
        }

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    /// Route a prefixed `tools/call` to the owning backend.
    ///
    /// The caller's request id is forwarded verbatim so the backend's
    /// response correlates without rewriting.
    pub async fn call_tool(
        &self,
        org: &str,
        name: &str,
        request_id: RequestId,
        params: CallToolParams,
    ) -> GatewayResult<JsonRpcResponse> {
        let namespace = self.namespace(org, name).await?;

        let Some((server_name, tool_name)) = split_prefixed(&params.name) else {
            return Err(ProtocolError::MethodNotFound {
                method: params.name.clone(),
            }
            .into());
        };

        // Resolve the prefix against the namespace's own mappings.
        let mut owner = None;
        for mapping in &namespace.servers {
            if let Some(server) = self.discovery.get(&mapping.server_id).await {
                if server.name == server_name {
                    owner = Some((mapping, server));
                    break;
                }
            }
        }
        let Some((mapping, server)) = owner else {
            return Err(ProtocolError::MethodNotFound {
                method: params.name.clone(),
            }
            .into());
        };

        if mapping.status != MappingStatus::Active
            || namespace.tool_status(&server.id, tool_name) != MappingStatus::Active
        {
            return Err(ProtocolError::MethodNotFound {
                method: params.name.clone(),
            }
            .into());
        }
        if !server.is_active || server.status != ServerStatus::Active {
            return Err(GatewayError::ServerUnavailable {
                reason: format!("server '{}' is not serving", server.name),
            });
        }

        let forwarded = JsonRpcRequest::new(
            request_id,
            "tools/call",
            json!({
                "name": tool_name,
                "arguments": params.arguments.unwrap_or(json!({})),
            }),
        );
        self.pool
            .request(&server, &self.discovery, forwarded, Some(server.timeout))
            .await
    }
}
