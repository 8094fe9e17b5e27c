//! Backend transport layer: one contract, four wire implementations.
//!
//! The gateway reaches its backend MCP servers over whichever wire each
//! one speaks:
//!
//! - **stdio**: a supervised local subprocess, newline-delimited JSON
//! - **HTTP**: plain request/response POST (including streamable dual-mode)
//! - **SSE**: an event stream with a POST side channel
//! - **WebSocket**: full-duplex text frames
//!
//! Every implementation satisfies the same [`Transport`] trait so the
//! session manager and router never care which wire is underneath.
//! Optional behaviours (subprocess restart, pid inspection, replay) are
//! advertised through [`Capability`] flags rather than downcasting.

pub mod config;
pub mod factory;

#[cfg(feature = "stdio")]
pub mod stdio;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "sse")]
pub mod sse;

#[cfg(feature = "websocket")]
pub mod ws;

pub use config::*;
pub use factory::*;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayResult, TransportError};
use crate::messages::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};

/// The wire protocol a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local subprocess over stdin/stdout.
    Stdio,
    /// HTTP request/response (and streamable dual-mode).
    Http,
    /// Server-Sent Events stream.
    Sse,
    /// WebSocket.
    Websocket,
}

impl TransportKind {
    /// Stable lowercase name, used in logs, metrics, and wire paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
            Self::Websocket => "websocket",
        }
    }

    /// Parse from the lowercase wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdio" => Some(Self::Stdio),
            "http" | "https" => Some(Self::Http),
            "sse" => Some(Self::Sse),
            "websocket" | "ws" | "wss" => Some(Self::Websocket),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of event types a transport can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The underlying wire came up.
    Connected,
    /// An inbound JSON-RPC message.
    Message,
    /// A transport-level failure (payload carries the cause).
    Error,
    /// The wire went down.
    Close,
    /// Keepalive probe.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Transport-specific diagnostics (e.g. subprocess stderr).
    Custom,
}

impl EventKind {
    /// Stable lowercase name for SSE `event:` fields and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Message => "message",
            Self::Error => "error",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Custom => "custom",
        }
    }
}

/// One inbound occurrence on a transport.
///
/// Event ids are assigned later, by the session's event log; a transport
/// only produces the kind, payload, and wall-clock timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEvent {
    /// What happened.
    pub kind: EventKind,
    /// Event payload; a full envelope for `message`, diagnostics otherwise.
    pub data: Value,
    /// When the transport observed it.
    pub timestamp: DateTime<Utc>,
}

impl TransportEvent {
    /// Create an event stamped with the current time.
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Wrap an inbound JSON-RPC message.
    pub fn message(message: &JsonRpcMessage) -> Self {
        Self::new(
            EventKind::Message,
            serde_json::to_value(message).unwrap_or(Value::Null),
        )
    }

    /// An error event with a reason string.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(EventKind::Error, Value::String(reason.into()))
    }

    /// A close event.
    pub fn close() -> Self {
        Self::new(EventKind::Close, Value::Null)
    }
}

/// Optional behaviours a transport may advertise.
///
/// Callers check `supports()` instead of downcasting; a capability listed
/// here guarantees the corresponding trait method is functional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// One-shot command execution (stdio).
    ExecuteCommand,
    /// `restart()` respawns the underlying process (stdio).
    RestartProcess,
    /// `pid()` returns the live process id (stdio).
    Pid,
    /// Inbound events can be replayed from a session log (SSE, streamable).
    Replay,
    /// The transport keeps per-session server state (SSE, WS, streamable).
    Stateful,
}

/// Point-in-time transport status: identity, liveness, and counters.
///
/// The manager aggregates these into its process-wide metrics map.
#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    /// Which wire this is.
    pub kind: TransportKind,
    /// Whether the wire is currently up.
    pub connected: bool,
    /// When the wire came up, if connected.
    pub connected_since: Option<DateTime<Utc>>,
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages and events received.
    pub messages_received: u64,
    /// Errors observed.
    pub errors: u64,
    /// Bytes written to the wire.
    pub bytes_out: u64,
    /// Bytes read from the wire.
    pub bytes_in: u64,
    /// Transport-specific metadata (pid, urls, session id, ...).
    pub metadata: HashMap<String, Value>,
}

impl TransportStatus {
    /// Fresh status for a disconnected transport.
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            connected: false,
            connected_since: None,
            messages_sent: 0,
            messages_received: 0,
            errors: 0,
            bytes_out: 0,
            bytes_in: 0,
            metadata: HashMap::new(),
        }
    }

    /// Mark the wire up.
    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.connected_since = Some(Utc::now());
    }

    /// Mark the wire down.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.connected_since = None;
    }

    /// Record an outbound message of `bytes` length.
    pub fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_out += bytes as u64;
    }

    /// Record an inbound message of `bytes` length.
    pub fn record_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_in += bytes as u64;
    }

    /// Record an error.
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Attach transport-specific metadata.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

/// The uniform contract every backend transport implements.
///
/// Lifecycle: `connect` (idempotent until `close`) → any number of
/// `send`/`request`/`receive` → `close` (releases every resource on every
/// exit path). All suspension points honour cancellation: dropping the
/// future aborts the underlying I/O.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which wire this transport speaks.
    fn kind(&self) -> TransportKind;

    /// Establish the underlying wire. Calling `connect` on an already
    /// connected transport is a no-op.
    async fn connect(&mut self) -> GatewayResult<()>;

    /// Tear the wire down and release all resources.
    async fn close(&mut self) -> GatewayResult<()>;

    /// Whether the wire is currently up.
    fn is_connected(&self) -> bool;

    /// Deliver a message without waiting for any reply.
    async fn send(&mut self, message: JsonRpcMessage) -> GatewayResult<()>;

    /// Send a request and wait for the response with the matching id.
    ///
    /// `timeout` falls back to the transport's configured default.
    async fn request(
        &mut self,
        request: JsonRpcRequest,
        timeout: Option<Duration>,
    ) -> GatewayResult<JsonRpcResponse>;

    /// Consume the next inbound event.
    ///
    /// Returns `Ok(None)` once the wire has closed and all buffered events
    /// are drained; the sequence is finite and not restartable.
    async fn receive(&mut self) -> GatewayResult<Option<TransportEvent>>;

    /// Detach the inbound event channel for external pumping.
    ///
    /// Lets an owner drain events without holding a lock on the transport
    /// across the wait. After a successful take, `receive()` yields
    /// `Ok(None)`. Transports with no inbound stream return `None`.
    fn take_events(&mut self) -> Option<tokio::sync::mpsc::UnboundedReceiver<TransportEvent>> {
        None
    }

    /// Bind this transport to its session record.
    fn set_session_id(&mut self, session_id: &str);

    /// The bound session id, if any.
    fn session_id(&self) -> Option<String>;

    /// Lightweight liveness probe used by the manager and health loop.
    async fn health_check(&mut self) -> GatewayResult<()>;

    /// The optional behaviours this transport implements.
    fn capabilities(&self) -> &'static [Capability];

    /// Whether a specific capability is advertised.
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Point-in-time status and counters.
    fn status(&self) -> TransportStatus;

    /// Process id of the underlying subprocess, when [`Capability::Pid`]
    /// is advertised.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Close and respawn the underlying process, when
    /// [`Capability::RestartProcess`] is advertised.
    async fn restart(&mut self) -> GatewayResult<()> {
        Err(TransportError::Unsupported {
            transport_type: self.kind().as_str(),
            capability: "restart_process",
        }
        .into())
    }
}
