//! Tool discovery and invocation message shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by a backend server.
///
/// The gateway treats `input_schema` as opaque JSON; it is carried through
/// aggregation untouched. Deserialization accepts both `inputSchema` (the
/// MCP wire form) and `input_schema` because backends disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name, unique per backend.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the tool's arguments.
    #[serde(
        rename = "inputSchema",
        alias = "input_schema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
}

impl Tool {
    /// Create a tool with a name and description and no schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
        }
    }
}

/// Result of a `tools/list` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Tools available on the server (or aggregated namespace).
    pub tools: Vec<Tool>,

    /// Pagination cursor, passed through verbatim when a backend sets it.
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name. At the gateway boundary this is the prefixed
    /// `{server}__{tool}` form; backends see the raw name.
    pub name: String,

    /// Tool arguments, forwarded untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}
