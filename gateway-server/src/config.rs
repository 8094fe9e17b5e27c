//! Gateway runtime configuration.
//!
//! Loaded from a JSON/YAML/TOML file, then overlaid with `GATEWAY_*`
//! environment variables so containerized deployments can tune single
//! knobs without shipping a file. Durations accept humantime strings
//! ("30s", "5m") in files and plain seconds in the environment.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gateway_core::error::{ConfigError, GatewayResult};

/// Response mode of the streamable HTTP endpoint when the client's Accept
/// header does not force one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamableMode {
    /// Answer with a plain JSON body.
    #[default]
    Json,
    /// Answer with a one-shot SSE stream.
    Sse,
}

/// CORS policy shared by all HTTP-family endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to call the gateway; `*` for any.
    pub allowed_origins: Vec<String>,
    /// Methods allowed on the gateway endpoints.
    pub allowed_methods: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "HEAD".to_string(),
                "OPTIONS".to_string(),
            ],
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Name reported in `serverInfo` and logs.
    pub gateway_name: String,

    /// Listen address for the wire surface.
    pub bind_addr: String,

    /// Per-server health probe period.
    #[serde(with = "humantime_serde")]
    pub health_interval: Duration,

    /// Consecutive probe failures before a server is demoted.
    pub failure_threshold: u32,

    /// How long a demoted server is left alone before probes resume
    /// counting from zero.
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Worker pool bound for health probing and tool fan-out.
    pub health_check_max_workers: usize,

    /// Idle time after which a session is reaped.
    #[serde(with = "humantime_serde")]
    pub session_idle_timeout: Duration,

    /// Ring buffer capacity of each session's event log.
    pub event_buffer_size: usize,

    /// Default response mode for the streamable endpoint.
    pub streamable_mode: StreamableMode,

    /// When set, all traffic is attributed to the zero-UUID organization.
    pub single_tenant: bool,

    /// CORS policy for the HTTP surface.
    pub cors: CorsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_name: "mcp-gateway".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
            health_interval: Duration::from_secs(30),
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            health_check_max_workers: 10,
            session_idle_timeout: Duration::from_secs(30 * 60),
            event_buffer_size: 1024,
            streamable_mode: StreamableMode::Json,
            single_tenant: false,
            cors: CorsConfig::default(),
        }
    }
}

/// The organization id used when `single_tenant` is set.
pub const ZERO_ORG: &str = "00000000-0000-0000-0000-000000000000";

impl GatewayConfig {
    /// Load from a file, format chosen by extension, then apply
    /// environment overrides.
    pub fn load(path: impl AsRef<std::path::Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let mut config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            _ => {
                return Err(ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: "unsupported file format, use .json, .yaml, or .toml".to_string(),
                }
                .into())
            }
        };

        config.apply_env(&std::env::vars().collect());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides; used when no file is given.
    pub fn from_env() -> GatewayResult<Self> {
        let mut config = Self::default();
        config.apply_env(&std::env::vars().collect());
        config.validate()?;
        Ok(config)
    }

    /// Overlay `GATEWAY_*` variables onto this config.
    fn apply_env(&mut self, vars: &HashMap<String, String>) {
        if let Some(v) = vars.get("GATEWAY_NAME") {
            self.gateway_name = v.clone();
        }
        if let Some(v) = vars.get("GATEWAY_BIND_ADDR") {
            self.bind_addr = v.clone();
        }
        if let Some(v) = vars.get("GATEWAY_HEALTH_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.health_interval = Duration::from_secs(secs);
            }
        }
        if let Some(v) = vars.get("GATEWAY_FAILURE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.failure_threshold = n;
            }
        }
        if let Some(v) = vars.get("GATEWAY_RECOVERY_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.recovery_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(v) = vars.get("GATEWAY_HEALTH_CHECK_MAX_WORKERS") {
            if let Ok(n) = v.parse() {
                self.health_check_max_workers = n;
            }
        }
        if let Some(v) = vars.get("GATEWAY_SESSION_IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.session_idle_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(v) = vars.get("GATEWAY_EVENT_BUFFER_SIZE") {
            if let Ok(n) = v.parse() {
                self.event_buffer_size = n;
            }
        }
        if let Some(v) = vars.get("GATEWAY_STREAMABLE_MODE") {
            match v.as_str() {
                "json" => self.streamable_mode = StreamableMode::Json,
                "sse" => self.streamable_mode = StreamableMode::Sse,
                _ => {}
            }
        }
        if let Some(v) = vars.get("GATEWAY_SINGLE_TENANT") {
            self.single_tenant = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.event_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "event_buffer_size".to_string(),
                value: "0".to_string(),
                reason: "event ring must hold at least one event".to_string(),
            }
            .into());
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "failure_threshold".to_string(),
                value: "0".to_string(),
                reason: "threshold must be at least one failure".to_string(),
            }
            .into());
        }
        if self.health_check_max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "health_check_max_workers".to_string(),
                value: "0".to_string(),
                reason: "worker pool must have at least one worker".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// The organization id requests fall back to in single-tenant mode.
    pub fn default_org(&self) -> Option<&'static str> {
        self.single_tenant.then_some(ZERO_ORG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.health_check_max_workers, 10);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.event_buffer_size, 1024);
        assert_eq!(config.streamable_mode, StreamableMode::Json);
        assert!(!config.single_tenant);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = GatewayConfig::default();
        let vars: HashMap<String, String> = [
            ("GATEWAY_FAILURE_THRESHOLD", "5"),
            ("GATEWAY_STREAMABLE_MODE", "sse"),
            ("GATEWAY_SINGLE_TENANT", "true"),
            ("GATEWAY_HEALTH_INTERVAL_SECS", "10"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.apply_env(&vars);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.streamable_mode, StreamableMode::Sse);
        assert!(config.single_tenant);
        assert_eq!(config.health_interval, Duration::from_secs(10));
        assert_eq!(config.default_org(), Some(ZERO_ORG));
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let config = GatewayConfig {
            event_buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_round_trip_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        let config = GatewayConfig {
            gateway_name: "test-gw".to_string(),
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = GatewayConfig::load(&path).unwrap();
        assert_eq!(loaded.gateway_name, "test-gw");
    }
}
