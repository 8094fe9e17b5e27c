//! Error types for gateway operations.
//!
//! Every failure the gateway can produce funnels into [`GatewayError`], which
//! knows how to render itself three ways:
//!
//! - as a JSON-RPC error code for the wire ([`GatewayError::jsonrpc_code`]),
//! - as an HTTP status for the REST-ish surfaces ([`GatewayError::http_status`]),
//! - as a sanitized, user-facing message ([`GatewayError::sanitized_message`]).
//!
//! Transport, protocol, and configuration failures keep their own enums so
//! call sites can match on the family they care about.

use std::time::Duration;

use thiserror::Error;

use crate::messages::JsonRpcError;

/// JSON-RPC code for a generic backend/server failure.
pub const CODE_SERVER_ERROR: i32 = -32000;
/// JSON-RPC code for a timed-out forwarded call.
pub const CODE_TIMEOUT: i32 = -32001;
/// JSON-RPC code for a cancelled in-flight call.
pub const CODE_CANCELLED: i32 = -32002;

/// The main error type for all gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transport-level failures (connection, framing, subprocess, I/O).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON-RPC protocol violations.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration problems (bad files, missing parameters).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An operation exceeded its deadline.
    #[error("operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline in milliseconds.
        duration_ms: u64,
    },

    /// The caller's context was cancelled while the operation was in flight.
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// The operation that was cancelled.
        operation: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// Raw I/O failure.
    #[error("io error: {source}")]
    Io {
        #[from]
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A session id did not resolve to a live session.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The id that failed to resolve.
        session_id: String,
    },

    /// No healthy backend is available to serve the request.
    #[error("no backend available: {reason}")]
    ServerUnavailable {
        /// Why no backend could be selected.
        reason: String,
    },

    /// A uniqueness constraint was violated (duplicate names on register).
    #[error("conflict: {reason}")]
    Conflict {
        /// What collided.
        reason: String,
    },

    /// A referenced record does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What failed to resolve.
        what: String,
    },

    /// Anything that doesn't fit a structured variant.
    #[error("internal error: {message}")]
    Internal {
        /// Error message, logged in full and sanitized on the wire.
        message: String,
    },
}

/// Transport-specific failures across the stdio, HTTP, SSE, and WebSocket
/// implementations.
#[derive(Error, Debug, Clone)]
#[allow(missing_docs)]
pub enum TransportError {
    #[error("failed to connect {transport_type} transport: {reason}")]
    ConnectionFailed {
        transport_type: &'static str,
        reason: String,
    },

    #[error("{transport_type} connection lost: {reason}")]
    ConnectionLost {
        transport_type: &'static str,
        reason: String,
    },

    #[error("{transport_type} transport not connected")]
    NotConnected { transport_type: &'static str },

    #[error("failed to send via {transport_type}: {reason}")]
    SendFailed {
        transport_type: &'static str,
        reason: String,
    },

    #[error("failed to receive via {transport_type}: {reason}")]
    ReceiveFailed {
        transport_type: &'static str,
        reason: String,
    },

    /// Child-process failures for the stdio transport.
    #[error("process error: {reason}")]
    Process { reason: String },

    #[error("http error {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("sse error: {reason}")]
    Sse { reason: String },

    #[error("websocket error: {reason}")]
    WebSocket { reason: String },

    #[error("invalid {transport_type} configuration: {reason}")]
    InvalidConfig {
        transport_type: &'static str,
        reason: String,
    },

    /// The requested capability is not implemented by this transport.
    #[error("{transport_type} transport does not support {capability}")]
    Unsupported {
        transport_type: &'static str,
        capability: &'static str,
    },
}

/// JSON-RPC protocol violations detected while parsing or routing.
#[derive(Error, Debug, Clone)]
#[allow(missing_docs)]
pub enum ProtocolError {
    #[error("parse error: {reason}")]
    Parse { reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },

    /// An error response relayed from a backend, code preserved.
    #[error("backend error {code}: {message}")]
    Backend { code: i32, message: String },
}

/// Configuration-related errors.
#[derive(Error, Debug, Clone)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    #[error("missing required configuration parameter: {parameter}")]
    MissingParameter { parameter: String },

    #[error("invalid value for '{parameter}': {value} - {reason}")]
    InvalidValue {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("conflicting configuration: {reason}")]
    Conflict { reason: String },
}

/// Convenience alias for results using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Create an internal error from a plain message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a cancellation error for the named operation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// The JSON-RPC error code this error maps to on the wire.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            GatewayError::Protocol(p) => match p {
                ProtocolError::Parse { .. } => -32700,
                ProtocolError::InvalidRequest { .. } => -32600,
                ProtocolError::MethodNotFound { .. } => -32601,
                ProtocolError::InvalidParams { .. } => -32602,
                ProtocolError::Backend { code, .. } => *code,
            },
            GatewayError::Timeout { .. } => CODE_TIMEOUT,
            GatewayError::Cancelled { .. } => CODE_CANCELLED,
            GatewayError::Transport(_) | GatewayError::ServerUnavailable { .. } => {
                CODE_SERVER_ERROR
            }
            GatewayError::SessionNotFound { .. }
            | GatewayError::Conflict { .. }
            | GatewayError::NotFound { .. } => CODE_SERVER_ERROR,
            GatewayError::Config(_)
            | GatewayError::Serialization { .. }
            | GatewayError::Io { .. }
            | GatewayError::Internal { .. } => -32603,
        }
    }

    /// The HTTP status the admin/wire surface should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Protocol(p) => match p {
                ProtocolError::Parse { .. } | ProtocolError::InvalidRequest { .. } => 400,
                // Routed errors still produce a well-formed JSON-RPC body.
                _ => 200,
            },
            GatewayError::Timeout { .. } => 200,
            GatewayError::Cancelled { .. } => 499,
            GatewayError::Transport(_) => 200,
            GatewayError::SessionNotFound { .. } | GatewayError::NotFound { .. } => 404,
            GatewayError::Conflict { .. } => 409,
            GatewayError::ServerUnavailable { .. } => 503,
            GatewayError::Config(_) => 400,
            GatewayError::Serialization { .. }
            | GatewayError::Io { .. }
            | GatewayError::Internal { .. } => 500,
        }
    }

    /// A message safe to show to clients.
    ///
    /// Structured errors keep their text; anything internal is rewritten so
    /// backend details never leak onto the wire. The full cause is expected
    /// to be logged before calling this.
    pub fn sanitized_message(&self) -> String {
        match self {
            GatewayError::Internal { .. }
            | GatewayError::Io { .. }
            | GatewayError::Serialization { .. } => {
                "An internal error occurred. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Render as a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.jsonrpc_code(), self.sanitized_message(), None)
    }

    /// Whether the failed operation may be worth retrying.
    ///
    /// Only used for idempotent reads; the router never retries mutations.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(t) => t.is_retryable(),
            GatewayError::Timeout { .. } => true,
            GatewayError::Io { .. } => true,
            GatewayError::ServerUnavailable { .. } => true,
            GatewayError::Cancelled { .. } => false,
            GatewayError::Protocol(_) => false,
            GatewayError::Config(_) => false,
            GatewayError::Serialization { .. } => false,
            GatewayError::SessionNotFound { .. } => false,
            GatewayError::Conflict { .. } => false,
            GatewayError::NotFound { .. } => false,
            GatewayError::Internal { .. } => false,
        }
    }

    /// Error family label for metrics and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::Transport(_) => "transport",
            GatewayError::Protocol(_) => "protocol",
            GatewayError::Config(_) => "config",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Cancelled { .. } => "cancelled",
            GatewayError::Serialization { .. } => "serialization",
            GatewayError::Io { .. } => "io",
            GatewayError::SessionNotFound { .. } => "session",
            GatewayError::ServerUnavailable { .. } => "unavailable",
            GatewayError::Conflict { .. } => "conflict",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Internal { .. } => "internal",
        }
    }
}

/// HTTP status for a JSON-RPC error code, for responses that no longer
/// carry the originating [`GatewayError`].
///
/// Mirrors [`GatewayError::http_status`]: structural rejections are 400,
/// internal failures 500, cancellation 499, and everything routed
/// (method-not-found, invalid params, backend errors, timeouts) stays
/// 200 with a well-formed error body.
pub fn http_status_for_code(code: i32) -> u16 {
    match code {
        -32700 | -32600 => 400,
        -32603 => 500,
        CODE_CANCELLED => 499,
        _ => 200,
    }
}

impl TransportError {
    /// Whether this transport error is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { .. } => true,
            TransportError::ConnectionLost { .. } => true,
            TransportError::SendFailed { .. } => true,
            TransportError::ReceiveFailed { .. } => true,
            // 5xx backends may recover; 4xx responses will not change.
            TransportError::Http { status, .. } => *status >= 500,
            TransportError::Sse { .. } => true,
            TransportError::WebSocket { .. } => true,
            TransportError::NotConnected { .. } => false,
            TransportError::Process { .. } => false,
            TransportError::InvalidConfig { .. } => false,
            TransportError::Unsupported { .. } => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::timeout("http request", Duration::from_secs(30))
        } else if err.is_connect() {
            GatewayError::Transport(TransportError::ConnectionFailed {
                transport_type: "http",
                reason: err.to_string(),
            })
        } else if let Some(status) = err.status() {
            GatewayError::Transport(TransportError::Http {
                status: status.as_u16(),
                reason: err.to_string(),
            })
        } else {
            GatewayError::Transport(TransportError::Http {
                status: 0,
                reason: err.to_string(),
            })
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::Config(ConfigError::InvalidValue {
            parameter: "url".to_string(),
            value: err.to_string(),
            reason: "invalid URL format".to_string(),
        })
    }
}
