//! # Gateway Core Library
//!
//! `gateway-core` provides the foundational types and transport
//! implementations the MCP gateway is built on: the JSON-RPC 2.0 envelope,
//! a structured error taxonomy mapped to wire codes, and the four backend
//! transports (stdio subprocess, HTTP, SSE, WebSocket) behind one
//! [`transport::Transport`] contract.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gateway_core::messages::JsonRpcRequest;
//! use gateway_core::transport::{TransportConfig, TransportFactory};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::stdio("python", &["server.py"]);
//!     let mut transport = TransportFactory::create(config)?;
//!
//!     transport.connect().await?;
//!     let response = transport
//!         .request(JsonRpcRequest::new(1, "initialize", json!({})), None)
//!         .await?;
//!     println!("initialized: {response:?}");
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`]: the [`error::GatewayError`] taxonomy with JSON-RPC and
//!   HTTP mappings
//! - [`messages`]: envelope types and batch decoding
//! - [`transport`]: the transport contract, configuration, and the four
//!   wire implementations (each behind its own feature flag, all on by
//!   default)

#![warn(missing_docs)]

pub mod error;
pub mod messages;
pub mod transport;

pub use error::{GatewayError, GatewayResult};
pub use messages::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use transport::{Transport, TransportConfig, TransportEvent, TransportFactory, TransportKind};
