//! JSON-RPC 2.0 message types for MCP traffic.
//!
//! The gateway forwards payloads opaquely; only the envelope shapes here
//! are ever inspected. `batch` adds the single-vs-array decoding the
//! router needs; `tools` and `initialize` cover the two MCP surfaces the
//! gateway itself participates in (aggregation and the handshake).

pub mod batch;
pub mod core;
pub mod initialize;
pub mod tools;

pub use batch::{InboundCall, RpcPayload};
pub use core::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use initialize::{InitializeParams, InitializeResult, PeerInfo, DEFAULT_PROTOCOL_VERSION};
pub use tools::{CallToolParams, ListToolsResult, Tool};
