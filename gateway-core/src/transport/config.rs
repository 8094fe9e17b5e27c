//! Transport configuration.
//!
//! A [`TransportConfig`] pins down everything needed to open one backend
//! wire: the command line for a stdio subprocess, or the URL plus headers
//! for the HTTP-family transports. Configs are serde-tagged so they can be
//! stored and loaded from JSON, YAML, or TOML files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, GatewayResult};
use crate::transport::TransportKind;

/// Default per-request timeout applied when a config does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one backend transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Local subprocess over stdin/stdout.
    Stdio(StdioConfig),

    /// HTTP request/response endpoint (plain or streamable).
    Http(HttpConfig),

    /// Server-Sent Events stream endpoint.
    Sse(HttpConfig),

    /// WebSocket endpoint.
    Websocket(HttpConfig),
}

impl TransportConfig {
    /// Stdio config from a command and arguments, defaults elsewhere.
    pub fn stdio(command: impl Into<String>, args: &[impl ToString]) -> Self {
        Self::Stdio(StdioConfig {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// HTTP config from an endpoint URL.
    pub fn http(url: impl AsRef<str>) -> GatewayResult<Self> {
        Ok(Self::Http(HttpConfig::parse(url)?))
    }

    /// SSE config from an endpoint URL.
    pub fn sse(url: impl AsRef<str>) -> GatewayResult<Self> {
        Ok(Self::Sse(HttpConfig::parse(url)?))
    }

    /// WebSocket config from an endpoint URL.
    pub fn websocket(url: impl AsRef<str>) -> GatewayResult<Self> {
        Ok(Self::Websocket(HttpConfig::parse(url)?))
    }

    /// The transport kind this config produces.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::Sse(_) => TransportKind::Sse,
            Self::Websocket(_) => TransportKind::Websocket,
        }
    }

    /// Per-request timeout for this transport.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Stdio(c) => c.timeout,
            Self::Http(c) | Self::Sse(c) | Self::Websocket(c) => c.timeout,
        }
    }

    /// Validate the configuration.
    ///
    /// A stdio config must name a command and no URL is involved; the
    /// HTTP-family configs must carry a URL whose scheme matches the
    /// transport. Exactly one locator shape per protocol, never both.
    pub fn validate(&self) -> GatewayResult<()> {
        match self {
            Self::Stdio(c) => c.validate(),
            Self::Http(c) | Self::Sse(c) => c.validate(&["http", "https"]),
            Self::Websocket(c) => c.validate(&["ws", "wss", "http", "https"]),
        }
    }

    /// Load a config from a file, format chosen by extension.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
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

        config.validate()?;
        Ok(config)
    }

    /// Save the config to a file, format chosen by extension.
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> GatewayResult<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).map_err(|e| ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Some("toml") => toml::to_string(self).map_err(|e| ConfigError::InvalidFormat {
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

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration for the stdio subprocess transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Command to execute.
    pub command: String,

    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Deadline for request/response round trips on stdin/stdout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl StdioConfig {
    /// Create a config for a bare command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the round-trip timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.command.is_empty() {
            return Err(ConfigError::MissingParameter {
                parameter: "command".to_string(),
            }
            .into());
        }

        if let Some(ref dir) = self.working_dir {
            if !PathBuf::from(dir).is_dir() {
                return Err(ConfigError::InvalidValue {
                    parameter: "working_dir".to_string(),
                    value: dir.clone(),
                    reason: "directory does not exist".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Shared configuration for the HTTP-family transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Endpoint URL.
    pub url: Url,

    /// Extra headers sent on every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

impl HttpConfig {
    /// Create a config from an already-parsed URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn parse(url: impl AsRef<str>) -> GatewayResult<Self> {
        let url = url
            .as_ref()
            .parse()
            .map_err(|e: url::ParseError| ConfigError::InvalidValue {
                parameter: "url".to_string(),
                value: url.as_ref().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(url))
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self, schemes: &[&str]) -> GatewayResult<()> {
        if !schemes.contains(&self.url.scheme()) {
            return Err(ConfigError::InvalidValue {
                parameter: "url".to_string(),
                value: self.url.to_string(),
                reason: format!("scheme must be one of {schemes:?}"),
            }
            .into());
        }
        Ok(())
    }
}
