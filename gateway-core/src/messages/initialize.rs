//! MCP initialization handshake shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version the gateway answers with when a client omits one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Parameters of an `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,

    /// Client capabilities, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,

    /// Client identity.
    #[serde(rename = "clientInfo", default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<PeerInfo>,
}

/// Result of an `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version the gateway speaks; echoes the client's when known.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Gateway capabilities.
    pub capabilities: Value,

    /// Gateway identity.
    #[serde(rename = "serverInfo")]
    pub server_info: PeerInfo,
}

impl InitializeResult {
    /// Build the gateway's initialize result, echoing the client's
    /// protocol version when it supplied one.
    pub fn for_gateway(name: impl Into<String>, version: impl Into<String>, requested: Option<&str>) -> Self {
        Self {
            protocol_version: requested.unwrap_or(DEFAULT_PROTOCOL_VERSION).to_string(),
            capabilities: serde_json::json!({
                "tools": { "listChanged": false },
                "resources": {},
                "prompts": {},
            }),
            server_info: PeerInfo {
                name: name.into(),
                version: version.into(),
            },
        }
    }
}

/// Name/version pair identifying one side of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_requested_protocol_version() {
        let result = InitializeResult::for_gateway("gw", "0.1.0", Some("2025-03-26"));
        assert_eq!(result.protocol_version, "2025-03-26");
        assert_eq!(result.server_info.name, "gw");
    }

    #[test]
    fn defaults_protocol_version() {
        let result = InitializeResult::for_gateway("gw", "0.1.0", None);
        assert_eq!(result.protocol_version, DEFAULT_PROTOCOL_VERSION);
    }

    #[test]
    fn params_tolerate_missing_fields() {
        let params: InitializeParams = serde_json::from_str("{}").unwrap();
        assert!(params.protocol_version.is_none());
        assert!(params.client_info.is_none());
    }
}
