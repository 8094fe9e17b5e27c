//! Core JSON-RPC 2.0 message structures.
//!
//! These types are the envelope every gateway surface speaks: requests,
//! responses, notifications, and the error object, strictly following the
//! JSON-RPC 2.0 specification with MCP's conventions (string or numeric
//! ids, `params` always an object in practice).
//!
//! The gateway is deliberately opaque to payloads: routing only ever looks
//! at `jsonrpc`, `id`, and `method`, and forwards `params`/`result`
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Request id for JSON-RPC messages: string, number, or null.
///
/// MCP clients typically use numbers; the gateway's own internally
/// generated requests use UUID strings for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier.
    String(String),
    /// Numeric identifier.
    Number(i64),
    /// Null identifier (discouraged, but legal on the wire).
    Null,
}

impl RequestId {
    /// Generate a fresh UUID-backed id.
    pub fn random() -> Self {
        Self::String(Uuid::new_v4().to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        Self::Number(n as i64)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,

    /// Identifier echoed back on the matching response.
    pub id: RequestId,

    /// Method name being invoked.
    pub method: String,

    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request with the given id, method, and params.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Create a request without parameters.
    pub fn without_params(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Create a request with a random UUID id.
    pub fn with_random_id(method: impl Into<String>, params: Value) -> Self {
        Self::new(RequestId::random(), method, params)
    }

    /// Deserialize the params into a concrete type.
    ///
    /// Absent params deserialize as JSON `null`, which lets optional
    /// parameter structs use `#[serde(default)]`.
    pub fn params_as<T>(&self) -> Result<T, serde_json::Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        match &self.params {
            Some(params) => serde_json::from_value(params.clone()),
            None => serde_json::from_value(Value::Null),
        }
    }
}

/// JSON-RPC 2.0 response message.
///
/// Carries exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,

    /// Id from the corresponding request.
    pub id: RequestId,

    /// Success result, mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object, mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Whether this response carries a result.
    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 notification: a request without an id, expecting no reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,

    /// Method name being invoked.
    pub method: String,

    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a notification with parameters.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Create a notification without parameters.
    pub fn without_params(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: None,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,

    /// Human-readable message.
    pub message: String,

    /// Additional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error object.
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Parse error (−32700): the payload was not valid JSON.
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error", None)
    }

    /// Invalid request (−32600): not a well-formed JSON-RPC request.
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(-32600, "Invalid Request", Some(Value::String(details.into())))
    }

    /// Method not found (−32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            -32601,
            "Method not found",
            Some(Value::String(format!("Method '{}' not found", method.into()))),
        )
    }

    /// Invalid params (−32602).
    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::new(-32602, "Invalid params", Some(Value::String(details.into())))
    }

    /// Internal error (−32603).
    pub fn internal_error(details: impl Into<String>) -> Self {
        Self::new(-32603, "Internal error", Some(Value::String(details.into())))
    }

    /// Server error (−32000): a backend failed to serve the call.
    pub fn server_error(details: impl Into<String>) -> Self {
        Self::new(-32000, "Server error", Some(Value::String(details.into())))
    }

    /// Timeout (−32001): the forwarded call exceeded its deadline.
    pub fn timeout(details: impl Into<String>) -> Self {
        Self::new(-32001, "Request timed out", Some(Value::String(details.into())))
    }

    /// Cancelled (−32002): the caller went away mid-flight.
    pub fn cancelled(details: impl Into<String>) -> Self {
        Self::new(-32002, "Request cancelled", Some(Value::String(details.into())))
    }

    /// Whether the code is in the reserved JSON-RPC range.
    pub fn is_standard_error(&self) -> bool {
        matches!(self.code, -32700..=-32600)
    }

    /// Whether the code is in the implementation-defined server range.
    pub fn is_server_error(&self) -> bool {
        matches!(self.code, -32099..=-32000)
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

impl std::error::Error for JsonRpcError {}

/// Any JSON-RPC message: request, response, or notification.
///
/// Untagged, so deserialization picks the first shape that fits; requests
/// are tried before notifications because they are a superset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request message.
    Request(JsonRpcRequest),
    /// Response message.
    Response(JsonRpcResponse),
    /// Notification message.
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Method name, if this is a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }

    /// Request id, if this is a request or response.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Notification(_) => None,
        }
    }

    /// Whether this message expects a response.
    pub fn expects_response(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        Self::Request(req)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notif: JsonRpcNotification) -> Self {
        Self::Notification(notif)
    }
}
