//! Transport construction from configuration.

use std::time::Duration;

use super::{Transport, TransportConfig};
use crate::error::GatewayResult;

#[cfg(feature = "stdio")]
use super::stdio::StdioTransport;

#[cfg(feature = "http")]
use super::http::HttpTransport;

#[cfg(feature = "sse")]
use super::sse::SseTransport;

#[cfg(feature = "websocket")]
use super::ws::WebSocketTransport;

/// Builds transports from validated configuration.
///
/// Feature flags decide which wires are compiled in; asking for a wire
/// that is compiled out is a configuration error, not a panic.
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport from configuration.
    ///
    /// The config is validated before any construction happens. The
    /// returned transport is not yet connected.
    pub fn create(config: TransportConfig) -> GatewayResult<Box<dyn Transport>> {
        config.validate()?;

        match config {
            #[cfg(feature = "stdio")]
            TransportConfig::Stdio(stdio) => Ok(Box::new(StdioTransport::new(stdio))),

            #[cfg(not(feature = "stdio"))]
            TransportConfig::Stdio(_) => Err(disabled("stdio")),

            #[cfg(feature = "http")]
            TransportConfig::Http(http) => Ok(Box::new(HttpTransport::new(http))),

            #[cfg(not(feature = "http"))]
            TransportConfig::Http(_) => Err(disabled("http")),

            #[cfg(feature = "sse")]
            TransportConfig::Sse(http) => Ok(Box::new(SseTransport::new(http))),

            #[cfg(not(feature = "sse"))]
            TransportConfig::Sse(_) => Err(disabled("sse")),

            #[cfg(feature = "websocket")]
            TransportConfig::Websocket(http) => Ok(Box::new(WebSocketTransport::new(http))),

            #[cfg(not(feature = "websocket"))]
            TransportConfig::Websocket(_) => Err(disabled("websocket")),
        }
    }

    /// Wire names supported by this build.
    pub fn supported() -> Vec<&'static str> {
        vec![
            #[cfg(feature = "stdio")]
            "stdio",
            #[cfg(feature = "http")]
            "http",
            #[cfg(feature = "sse")]
            "sse",
            #[cfg(feature = "websocket")]
            "websocket",
        ]
    }

    /// Create a transport, retrying transient failures.
    pub async fn create_with_retry(
        config: TransportConfig,
        max_retries: u32,
        retry_delay: Duration,
    ) -> GatewayResult<Box<dyn Transport>> {
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match Self::create(config.clone()) {
                Ok(transport) => return Ok(transport),
                Err(err) => {
                    if !err.is_retryable() || attempt == max_retries {
                        return Err(err);
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        "transport creation failed, retrying in {retry_delay:?}: {err}"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| crate::error::GatewayError::internal("retry loop exhausted")))
    }
}

#[allow(dead_code)]
fn disabled(name: &'static str) -> crate::error::GatewayError {
    crate::error::ConfigError::InvalidValue {
        parameter: "transport_type".to_string(),
        value: name.to_string(),
        reason: format!("{name} transport support not compiled in (enable the '{name}' feature)"),
    }
    .into()
}
