//! Domain model: backend servers, health records, stats, namespaces.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gateway_core::error::{ConfigError, GatewayResult};
use gateway_core::transport::{HttpConfig, StdioConfig, TransportConfig};

/// Wire protocol a backend server is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProtocol {
    /// Plain HTTP endpoint.
    Http,
    /// HTTPS endpoint.
    Https,
    /// WebSocket endpoint.
    Websocket,
    /// SSE stream endpoint.
    Sse,
    /// Local subprocess.
    Stdio,
    /// Raw TCP endpoint (probe-only).
    Tcp,
}

impl ServerProtocol {
    /// Whether this protocol locates its backend with a URL.
    pub fn is_url_based(&self) -> bool {
        !matches!(self, Self::Stdio)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Websocket => "websocket",
            Self::Sse => "sse",
            Self::Stdio => "stdio",
            Self::Tcp => "tcp",
        }
    }
}

/// Registered status of a backend server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Serving traffic.
    Active,
    /// Registered but not serving.
    Inactive,
    /// Demoted by consecutive probe failures.
    Unhealthy,
    /// Probes paused by an operator.
    Maintenance,
}

/// A backend MCP server registration.
///
/// Exactly one locator is set: `url` for the network protocols, `command`
/// for stdio. `weight` is accepted and persisted but plays no part in
/// routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendServer {
    /// Server id (UUID).
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Display name, unique within the organization.
    pub name: String,
    /// Wire protocol.
    pub protocol: ServerProtocol,

    /// Endpoint URL for network protocols.
    #[serde(default)]
    pub url: Option<String>,
    /// Command for stdio backends.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for stdio backends.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment merged into the subprocess.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for stdio backends.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Dedicated health endpoint; `{url}/health` is probed when unset.
    #[serde(default)]
    pub health_url: Option<String>,

    /// Per-request timeout for forwarded calls.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry budget for idempotent reads.
    pub max_retries: u32,

    /// Current status, owned by the health loop and admin updates.
    pub status: ServerStatus,
    /// Soft-delete flag; inactive servers are never probed or routed to.
    pub is_active: bool,
    /// Optional relative weight; unused by routing.
    #[serde(default)]
    pub weight: Option<u32>,

    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl BackendServer {
    /// Create a URL-backed registration with defaults.
    pub fn new_url(
        organization_id: impl Into<String>,
        name: impl Into<String>,
        protocol: ServerProtocol,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            name: name.into(),
            protocol,
            url: Some(url.into()),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            health_url: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            status: ServerStatus::Active,
            is_active: true,
            weight: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a stdio-backed registration with defaults.
    pub fn new_stdio(
        organization_id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            name: name.into(),
            protocol: ServerProtocol::Stdio,
            url: None,
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            working_dir: None,
            health_url: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            status: ServerStatus::Active,
            is_active: true,
            weight: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enforce the locator invariant: URL protocols carry a URL and no
    /// command; stdio carries a command and no URL.
    pub fn validate(&self) -> GatewayResult<()> {
        match (self.protocol.is_url_based(), &self.url, &self.command) {
            (true, Some(_), None) => Ok(()),
            (false, None, Some(c)) if !c.is_empty() => Ok(()),
            _ => Err(ConfigError::Conflict {
                reason: format!(
                    "server '{}' must set exactly one of url/command matching protocol {}",
                    self.name,
                    self.protocol.as_str()
                ),
            }
            .into()),
        }
    }

    /// The URL probed by the health loop.
    pub fn health_endpoint(&self) -> Option<String> {
        if let Some(ref health) = self.health_url {
            return Some(health.clone());
        }
        self.url
            .as_ref()
            .map(|url| format!("{}/health", url.trim_end_matches('/')))
    }

    /// Build the transport configuration for forwarding to this server.
    pub fn transport_config(&self) -> GatewayResult<TransportConfig> {
        self.validate()?;
        match self.protocol {
            ServerProtocol::Http | ServerProtocol::Https => {
                let url = self.url.as_deref().unwrap_or_default().parse()?;
                Ok(TransportConfig::Http(
                    HttpConfig::new(url).timeout(self.timeout),
                ))
            }
            ServerProtocol::Sse => {
                let url = self.url.as_deref().unwrap_or_default().parse()?;
                Ok(TransportConfig::Sse(
                    HttpConfig::new(url).timeout(self.timeout),
                ))
            }
            ServerProtocol::Websocket => {
                let url = self.url.as_deref().unwrap_or_default().parse()?;
                Ok(TransportConfig::Websocket(
                    HttpConfig::new(url).timeout(self.timeout),
                ))
            }
            ServerProtocol::Stdio => {
                let mut config = StdioConfig::new(self.command.clone().unwrap_or_default())
                    .timeout(self.timeout);
                config.args = self.args.clone();
                config.env = self.env.clone();
                config.working_dir = self.working_dir.clone();
                Ok(TransportConfig::Stdio(config))
            }
            ServerProtocol::Tcp => Err(ConfigError::InvalidValue {
                parameter: "protocol".to_string(),
                value: "tcp".to_string(),
                reason: "tcp backends are health-probed only, not routable".to_string(),
            }
            .into()),
        }
    }
}

/// Outcome of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// The probe succeeded.
    Healthy,
    /// The probe got an answer that was not success.
    Unhealthy,
    /// The probe deadline elapsed.
    Timeout,
    /// The probe could not be attempted or errored outright.
    Error,
}

/// Persisted record of one probe; the most recent record is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    /// Probed server.
    pub server_id: String,
    /// Probe outcome.
    pub status: HealthState,
    /// Short human-readable summary (status line, error text).
    pub response_summary: String,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// When the probe completed.
    pub checked_at: DateTime<Utc>,
}

/// Per-server forwarding counters.
///
/// Latency smoothing uses an exponential moving average with alpha 0.1;
/// counters reset only on process restart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    /// Forwarded requests, total.
    pub total_requests: u64,
    /// Requests that produced a response.
    pub success_requests: u64,
    /// Requests that failed at the transport or timed out.
    pub error_requests: u64,
    /// Smoothed latency in milliseconds.
    pub avg_latency_ms: f64,
}

impl ServerStats {
    const ALPHA: f64 = 0.1;

    /// Record one forwarded request.
    pub fn record(&mut self, success: bool, latency_ms: f64) {
        self.total_requests += 1;
        if success {
            self.success_requests += 1;
        } else {
            self.error_requests += 1;
        }
        if self.total_requests == 1 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms =
                Self::ALPHA * latency_ms + (1.0 - Self::ALPHA) * self.avg_latency_ms;
        }
    }
}

/// Activation status of a namespace mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MappingStatus {
    /// Participates in aggregation.
    Active,
    /// Hidden from aggregation.
    Inactive,
}

/// One server mapped into a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceServer {
    /// Mapped server id; unique per namespace.
    pub server_id: String,
    /// Ordering hint for display.
    pub priority: i32,
    /// Whether the mapping is live.
    pub status: MappingStatus,
}

/// Per-tool override within a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMapping {
    /// Owning server.
    pub server_id: String,
    /// Raw (unprefixed) tool name.
    pub tool_name: String,
    /// Whether the tool is exposed.
    pub status: MappingStatus,
}

/// A named grouping of servers whose tools aggregate under one facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace id (UUID).
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Namespace name, unique within the organization.
    pub name: String,
    /// Mapped servers; `(namespace, server)` pairs are unique.
    pub servers: Vec<NamespaceServer>,
    /// Tool overrides; `(namespace, server, tool)` triples are unique.
    pub tools: Vec<ToolMapping>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new(organization_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            name: name.into(),
            servers: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// Effective status of a tool; tools without an override are active.
    pub fn tool_status(&self, server_id: &str, tool_name: &str) -> MappingStatus {
        self.tools
            .iter()
            .find(|t| t.server_id == server_id && t.tool_name == tool_name)
            .map_or(MappingStatus::Active, |t| t.status)
    }

    /// The mapping entry for a server, if present.
    pub fn server_mapping(&self, server_id: &str) -> Option<&NamespaceServer> {
        self.servers.iter().find(|s| s.server_id == server_id)
    }
}

/// Caller identity resolved by the auth collaborator before the core
/// sees a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Authenticated user.
    pub user_id: String,
    /// Authenticated organization.
    pub organization_id: String,
    /// Backend server the request is bound to, when path-scoped.
    pub server_id: Option<String>,
    /// Namespace endpoint the request arrived through.
    pub endpoint: Option<String>,
}

impl AuthContext {
    /// Gateway-scoped context with no server binding.
    pub fn gateway(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            server_id: None,
            endpoint: None,
        }
    }

    /// Context bound to one backend server.
    pub fn for_server(
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            server_id: Some(server_id.into()),
            endpoint: None,
        }
    }
}
