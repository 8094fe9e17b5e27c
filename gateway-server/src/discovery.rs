//! Discovery and health registry.
//!
//! The in-memory index of backend servers, loaded from the repository at
//! startup and mutated through register/update/unregister. Every active
//! server gets a dedicated probe loop; a shared semaphore bounds how many
//! probes run at once.
//!
//! Demotion is threshold-based: one failing probe only bumps a counter,
//! and only `failure_threshold` consecutive failures flip the server to
//! `unhealthy`. A single healthy probe resets the counter and restores
//! `active` immediately. Maintenance pauses probing entirely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gateway_core::error::{GatewayError, GatewayResult, TransportError};

use crate::config::GatewayConfig;
use crate::model::{
    BackendServer, HealthCheckRecord, HealthState, ServerProtocol, ServerStats, ServerStatus,
};
use crate::repository::{HealthCheckRepository, ServerRepository, ToolDiscoveryService};
use crate::tasks::spawn_supervised;

/// Deadline for any single probe attempt.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness source for stdio backends, implemented by whichever component
/// supervises the long-lived subprocesses.
#[async_trait]
pub trait StdioHealth: Send + Sync {
    /// JSON-RPC `ping` against the running subprocess for this server.
    async fn ping(&self, server_id: &str) -> GatewayResult<()>;
}

/// Stdio health source for deployments with no process supervisor.
pub struct NoStdioHealth;

#[async_trait]
impl StdioHealth for NoStdioHealth {
    async fn ping(&self, server_id: &str) -> GatewayResult<()> {
        Err(TransportError::Process {
            reason: format!("no supervised process for server {server_id}"),
        }
        .into())
    }
}

/// Probe loop settings derived from the gateway config.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Probe period per server.
    pub interval: Duration,
    /// Consecutive failures before demotion.
    pub failure_threshold: u32,
    /// Probe period for servers already demoted.
    pub recovery_interval: Duration,
    /// Bound on concurrently running probes.
    pub max_workers: usize,
}

impl ProbeSettings {
    /// Extract the probe settings from the daemon config.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            interval: config.health_interval,
            failure_threshold: config.failure_threshold,
            recovery_interval: config.health_interval.max(config.recovery_timeout),
            max_workers: config.health_check_max_workers,
        }
    }
}

struct ServerEntry {
    server: BackendServer,
    consecutive_failures: u32,
}

struct Inner {
    servers: RwLock<HashMap<String, ServerEntry>>,
    stats: RwLock<HashMap<String, ServerStats>>,
    probes: Mutex<HashMap<String, JoinHandle<()>>>,
    probe_permits: Arc<Semaphore>,
    settings: ProbeSettings,
    repo: Arc<dyn ServerRepository>,
    health_repo: Arc<dyn HealthCheckRepository>,
    tool_discovery: Arc<dyn ToolDiscoveryService>,
    stdio_health: Arc<dyn StdioHealth>,
    http: reqwest::Client,
}

/// Process-wide server index with active health probing.
#[derive(Clone)]
pub struct DiscoveryRegistry {
    inner: Arc<Inner>,
}

impl DiscoveryRegistry {
    /// Create a registry over the given collaborators.
    pub fn new(
        settings: ProbeSettings,
        repo: Arc<dyn ServerRepository>,
        health_repo: Arc<dyn HealthCheckRepository>,
        tool_discovery: Arc<dyn ToolDiscoveryService>,
        stdio_health: Arc<dyn StdioHealth>,
    ) -> Self {
        let probe_permits = Arc::new(Semaphore::new(settings.max_workers.max(1)));
        Self {
            inner: Arc::new(Inner {
                servers: RwLock::new(HashMap::new()),
                stats: RwLock::new(HashMap::new()),
                probes: Mutex::new(HashMap::new()),
                probe_permits,
                settings,
                repo,
                health_repo,
                tool_discovery,
                stdio_health,
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Load an organization's non-deleted servers into the index and start
    /// their probes. Called once at startup per known organization.
    pub async fn load_organization(&self, org: &str) -> GatewayResult<usize> {
        let servers = self.inner.repo.list_by_organization(org, true).await?;
        let count = servers.len();
        for server in servers {
            self.index_and_probe(server, false).await;
        }
        info!(org, count, "discovery index loaded");
        Ok(count)
    }

    /// Register a new server: persist, index, start probing, and trigger
    /// asynchronous tool discovery.
    pub async fn register(&self, server: BackendServer) -> GatewayResult<String> {
        server.validate()?;
        self.inner.repo.create(server.clone()).await?;
        let id = server.id.clone();

        let discovery = Arc::clone(&self.inner.tool_discovery);
        let server_id = server.id.clone();
        let org = server.organization_id.clone();
        spawn_supervised("tool-discovery", async move {
            if let Err(e) = discovery.discover_server_tools(&server_id, &org).await {
                warn!(server_id, "tool discovery failed: {e}");
            }
        });

        self.index_and_probe(server, false).await;
        Ok(id)
    }

    /// Replace a server's registration in place.
    pub async fn update(&self, server: BackendServer) -> GatewayResult<()> {
        server.validate()?;
        self.inner.repo.update(server.clone()).await?;
        self.index_and_probe(server, true).await;
        Ok(())
    }

    /// Soft-delete a server and stop its probe.
    pub async fn unregister(&self, server_id: &str) -> GatewayResult<()> {
        self.inner.repo.delete(server_id).await?;
        self.inner.servers.write().await.remove(server_id);
        if let Some(probe) = self.inner.probes.lock().await.remove(server_id) {
            probe.abort();
        }
        info!(server_id, "server unregistered");
        Ok(())
    }

    /// Fetch a server from the index.
    pub async fn get(&self, server_id: &str) -> Option<BackendServer> {
        self.inner
            .servers
            .read()
            .await
            .get(server_id)
            .map(|e| e.server.clone())
    }

    /// Fetch a routable server: indexed, not soft-deleted, status active.
    pub async fn get_routable(&self, server_id: &str) -> GatewayResult<BackendServer> {
        let server = self.get(server_id).await.ok_or_else(|| GatewayError::NotFound {
            what: format!("server {server_id}"),
        })?;
        if !server.is_active {
            return Err(GatewayError::ServerUnavailable {
                reason: format!("server '{}' is deactivated", server.name),
            });
        }
        match server.status {
            ServerStatus::Active => Ok(server),
            other => Err(GatewayError::ServerUnavailable {
                reason: format!("server '{}' is {:?}", server.name, other),
            }),
        }
    }

    /// Admin status override. Maintenance pauses probing; the probe loop
    /// itself observes the new status on its next tick.
    pub async fn set_status(&self, server_id: &str, status: ServerStatus) -> GatewayResult<()> {
        self.inner.repo.update_status(server_id, status).await?;
        let mut servers = self.inner.servers.write().await;
        if let Some(entry) = servers.get_mut(server_id) {
            entry.server.status = status;
            entry.consecutive_failures = 0;
        }
        Ok(())
    }

    /// Record the outcome of one forwarded request for this server.
    pub async fn record_request(&self, server_id: &str, success: bool, latency: Duration) {
        let mut stats = self.inner.stats.write().await;
        stats
            .entry(server_id.to_string())
            .or_default()
            .record(success, latency.as_secs_f64() * 1000.0);
    }

    /// Point-in-time stats snapshot for one server.
    pub async fn stats_for(&self, server_id: &str) -> ServerStats {
        self.inner
            .stats
            .read()
            .await
            .get(server_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Stop every probe loop. Called on shutdown.
    pub async fn stop(&self) {
        let mut probes = self.inner.probes.lock().await;
        for (_, probe) in probes.drain() {
            probe.abort();
        }
    }

    async fn index_and_probe(&self, server: BackendServer, preserve_failures: bool) {
        let id = server.id.clone();
        {
            let mut servers = self.inner.servers.write().await;
            let failures = if preserve_failures {
                servers.get(&id).map_or(0, |e| e.consecutive_failures)
            } else {
                0
            };
            servers.insert(
                id.clone(),
                ServerEntry {
                    server,
                    consecutive_failures: failures,
                },
            );
        }

        let mut probes = self.inner.probes.lock().await;
        if let Some(old) = probes.remove(&id) {
            old.abort();
        }
        let registry = self.clone();
        let probe_id = id.clone();
        probes.insert(
            id,
            spawn_supervised("health-probe", async move {
                registry.probe_loop(probe_id).await;
            }),
        );
    }

    async fn probe_loop(self, server_id: String) {
        loop {
            let (interval, should_probe) = {
                let servers = self.inner.servers.read().await;
                match servers.get(&server_id) {
                    Some(entry) => {
                        let paused = !entry.server.is_active
                            || matches!(
                                entry.server.status,
                                ServerStatus::Maintenance | ServerStatus::Inactive
                            );
                        let interval = if entry.server.status == ServerStatus::Unhealthy {
                            self.inner.settings.recovery_interval
                        } else {
                            self.inner.settings.interval
                        };
                        (interval, !paused)
                    }
                    None => return,
                }
            };

            tokio::time::sleep(interval).await;

            if !should_probe {
                continue;
            }
            if let Err(e) = self.probe_server(&server_id).await {
                debug!(server_id, "probe round errored: {e}");
            }
        }
    }

    /// Run one probe round for a server and apply the result.
    pub async fn probe_server(&self, server_id: &str) -> GatewayResult<HealthCheckRecord> {
        let server = self.get(server_id).await.ok_or_else(|| GatewayError::NotFound {
            what: format!("server {server_id}"),
        })?;

        let _permit = self
            .inner
            .probe_permits
            .acquire()
            .await
            .map_err(|_| GatewayError::internal("probe semaphore closed"))?;

        let started = Instant::now();
        let (state, summary) = self.probe_once(&server).await;
        let latency = started.elapsed();

        let record = HealthCheckRecord {
            server_id: server_id.to_string(),
            status: state,
            response_summary: summary,
            latency_ms: latency.as_millis() as u64,
            checked_at: Utc::now(),
        };
        if let Err(e) = self.inner.health_repo.create(record.clone()).await {
            warn!(server_id, "failed to persist health record: {e}");
        }

        self.apply_probe(server_id, state).await?;
        Ok(record)
    }

    /// One protocol-appropriate probe attempt.
    async fn probe_once(&self, server: &BackendServer) -> (HealthState, String) {
        match server.protocol {
            ServerProtocol::Http | ServerProtocol::Https | ServerProtocol::Sse => {
                let Some(url) = server.health_endpoint() else {
                    return (HealthState::Error, "no health endpoint".to_string());
                };
                match self
                    .inner
                    .http
                    .get(&url)
                    .timeout(PROBE_TIMEOUT)
                    .send()
                    .await
                {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() {
                            (HealthState::Healthy, format!("{status}"))
                        } else if status.is_server_error() {
                            (HealthState::Error, format!("{status}"))
                        } else {
                            (HealthState::Unhealthy, format!("{status}"))
                        }
                    }
                    Err(e) if e.is_timeout() => (HealthState::Timeout, e.to_string()),
                    Err(e) => (HealthState::Error, e.to_string()),
                }
            }
            ServerProtocol::Websocket => {
                let Some(url) = server.url.clone() else {
                    return (HealthState::Error, "no url".to_string());
                };
                match tokio::time::timeout(
                    PROBE_TIMEOUT,
                    tokio_tungstenite_handshake(&url),
                )
                .await
                {
                    Ok(Ok(())) => (HealthState::Healthy, "handshake ok".to_string()),
                    Ok(Err(e)) => (HealthState::Error, e),
                    Err(_) => (HealthState::Timeout, "handshake timed out".to_string()),
                }
            }
            ServerProtocol::Tcp => {
                let Some(addr) = server
                    .url
                    .as_deref()
                    .map(|u| u.trim_start_matches("tcp://").to_string())
                else {
                    return (HealthState::Error, "no address".to_string());
                };
                match tokio::time::timeout(
                    PROBE_TIMEOUT,
                    tokio::net::TcpStream::connect(&addr),
                )
                .await
                {
                    Ok(Ok(_)) => (HealthState::Healthy, "connect ok".to_string()),
                    Ok(Err(e)) => (HealthState::Error, e.to_string()),
                    Err(_) => (HealthState::Timeout, "connect timed out".to_string()),
                }
            }
            ServerProtocol::Stdio => {
                match tokio::time::timeout(
                    PROBE_TIMEOUT,
                    self.inner.stdio_health.ping(&server.id),
                )
                .await
                {
                    Ok(Ok(())) => (HealthState::Healthy, "ping ok".to_string()),
                    Ok(Err(e)) => (HealthState::Error, e.to_string()),
                    Err(_) => (HealthState::Timeout, "ping timed out".to_string()),
                }
            }
        }
    }

    /// Threshold state machine: demote only at `failure_threshold`
    /// consecutive failures, recover on the first healthy probe.
    async fn apply_probe(&self, server_id: &str, state: HealthState) -> GatewayResult<()> {
        let transition = {
            let mut servers = self.inner.servers.write().await;
            let Some(entry) = servers.get_mut(server_id) else {
                return Ok(());
            };

            match state {
                HealthState::Healthy => {
                    entry.consecutive_failures = 0;
                    (entry.server.status == ServerStatus::Unhealthy).then(|| {
                        entry.server.status = ServerStatus::Active;
                        ServerStatus::Active
                    })
                }
                _ => {
                    entry.consecutive_failures += 1;
                    (entry.server.status == ServerStatus::Active
                        && entry.consecutive_failures >= self.inner.settings.failure_threshold)
                        .then(|| {
                            entry.server.status = ServerStatus::Unhealthy;
                            ServerStatus::Unhealthy
                        })
                }
            }
        };

        if let Some(status) = transition {
            info!(server_id, ?status, "server status transition");
            self.inner.repo.update_status(server_id, status).await?;
        }
        Ok(())
    }

    /// Snapshot of index size and per-status counts, for introspection.
    pub async fn summary(&self) -> serde_json::Value {
        let servers = self.inner.servers.read().await;
        let mut by_status: HashMap<&'static str, usize> = HashMap::new();
        for entry in servers.values() {
            let key = match entry.server.status {
                ServerStatus::Active => "active",
                ServerStatus::Inactive => "inactive",
                ServerStatus::Unhealthy => "unhealthy",
                ServerStatus::Maintenance => "maintenance",
            };
            *by_status.entry(key).or_default() += 1;
        }
        json!({
            "servers": servers.len(),
            "by_status": by_status,
        })
    }
}

/// WebSocket probe: attempt a handshake, then drop the connection.
async fn tokio_tungstenite_handshake(url: &str) -> Result<(), String> {
    let ws_url = if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        url.to_string()
    };
    tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}
