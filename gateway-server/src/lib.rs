//! # Gateway Server
//!
//! The MCP gateway daemon: a multi-tenant proxy that fronts a dynamic
//! fleet of backend MCP servers and exposes their tools over JSON-RPC,
//! SSE, WebSocket, and streamable HTTP.
//!
//! The moving parts, wired together by [`Gateway::build`]:
//!
//! - [`session::SessionRegistry`]: per-client sessions with ring-buffered
//!   event logs and replay
//! - [`manager::TransportManager`]: connection factory, lookup,
//!   broadcast, and metrics
//! - [`router::RpcRouter`]: JSON-RPC validation and dispatch
//! - [`discovery::DiscoveryRegistry`]: backend index with threshold-based
//!   health probing
//! - [`namespace::NamespaceAggregator`]: prefixed tool aggregation
//! - [`http`]: the axum wire surface

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod discovery;
pub mod http;
pub mod manager;
pub mod model;
pub mod namespace;
pub mod repository;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod tasks;

use std::sync::Arc;

use gateway_core::error::GatewayResult;
use tracing::info;

use crate::backend::BackendPool;
use crate::config::GatewayConfig;
use crate::discovery::{DiscoveryRegistry, ProbeSettings};
use crate::http::{AppState, SharedState};
use crate::manager::TransportManager;
use crate::namespace::NamespaceAggregator;
use crate::repository::Repositories;
use crate::router::RpcRouter;
use crate::session::SessionRegistry;
use crate::supervisor::ProcessSupervisor;

/// A fully wired gateway, ready to serve.
pub struct Gateway {
    /// Shared handler state; feed this to [`http::build_router`].
    pub state: SharedState,
    sweeper: tokio::task::JoinHandle<()>,
    pool: Arc<BackendPool>,
}

impl Gateway {
    /// Wire every component together over the given collaborators.
    pub async fn build(config: GatewayConfig, repos: Repositories) -> GatewayResult<Self> {
        let sessions =
            SessionRegistry::new(config.event_buffer_size, config.session_idle_timeout);
        let sweeper = sessions.start_sweeper(config.session_idle_timeout / 4);

        let manager = Arc::new(TransportManager::new(sessions.clone()));
        let supervisor = Arc::new(ProcessSupervisor::new());
        let pool = Arc::new(BackendPool::new());

        let discovery = DiscoveryRegistry::new(
            ProbeSettings::from_config(&config),
            Arc::clone(&repos.servers),
            Arc::clone(&repos.health),
            Arc::clone(&repos.tool_discovery),
            Arc::clone(&supervisor) as Arc<dyn discovery::StdioHealth>,
        );
        if let Some(org) = config.default_org() {
            discovery.load_organization(org).await?;
        }

        let aggregator = Arc::new(NamespaceAggregator::new(
            Arc::clone(&repos.namespaces),
            discovery.clone(),
            Arc::clone(&pool),
            config.health_check_max_workers,
        ));

        let router = Arc::new(RpcRouter::new(
            config.gateway_name.clone(),
            discovery.clone(),
            Arc::clone(&aggregator),
            Arc::clone(&pool),
            Arc::clone(&manager),
        ));

        let state = Arc::new(AppState {
            config,
            sessions,
            manager,
            discovery,
            router,
            aggregator,
            supervisor,
        });

        Ok(Self {
            state,
            sweeper,
            pool,
        })
    }

    /// Stop background work in reverse construction order: probes first,
    /// then sessions and their transports, then pooled backends.
    pub async fn shutdown(self) {
        info!("gateway shutting down");
        self.state.discovery.stop().await;
        self.state.manager.close_all().await;
        self.state.supervisor.shutdown().await;
        self.sweeper.abort();
        self.pool.close_all().await;
        info!("gateway shutdown complete");
    }
}
