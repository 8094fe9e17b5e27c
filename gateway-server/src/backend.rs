//! Pooled child transports to backend servers.
//!
//! Forwarded calls reuse one transport per backend; spawning a stdio
//! subprocess or re-handshaking a WebSocket per request would dominate
//! latency. A transport that fails at the wire level is invalidated so
//! the next call reopens it fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use gateway_core::error::{GatewayError, GatewayResult};
use gateway_core::messages::{JsonRpcRequest, JsonRpcResponse};
use gateway_core::transport::{Transport, TransportFactory};

use crate::discovery::DiscoveryRegistry;
use crate::model::BackendServer;

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Cache of connected child transports, keyed by server id.
#[derive(Default)]
pub struct BackendPool {
    transports: Mutex<HashMap<String, SharedTransport>>,
}

impl BackendPool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the pooled transport for a server, opening one if needed.
    pub async fn get_or_open(&self, server: &BackendServer) -> GatewayResult<SharedTransport> {
        let mut transports = self.transports.lock().await;
        if let Some(transport) = transports.get(&server.id) {
            return Ok(Arc::clone(transport));
        }

        let mut transport = TransportFactory::create(server.transport_config()?)?;
        transport.connect().await?;
        debug!(server_id = %server.id, kind = %transport.kind(), "opened backend transport");

        let shared = Arc::new(Mutex::new(transport));
        transports.insert(server.id.clone(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Close and drop the pooled transport for a server.
    pub async fn invalidate(&self, server_id: &str) {
        let transport = self.transports.lock().await.remove(server_id);
        if let Some(transport) = transport {
            let _ = transport.lock().await.close().await;
            debug!(server_id, "backend transport invalidated");
        }
    }

    /// Forward one request to a server over its pooled transport,
    /// recording the outcome in the discovery stats.
    ///
    /// Transport-level failures invalidate the pooled entry; protocol
    /// errors from the backend do not, since the wire itself is fine.
    pub async fn request(
        &self,
        server: &BackendServer,
        discovery: &DiscoveryRegistry,
        request: JsonRpcRequest,
        timeout: Option<Duration>,
    ) -> GatewayResult<JsonRpcResponse> {
        let transport = self.get_or_open(server).await?;
        let started = Instant::now();

        let result = {
            let mut transport = transport.lock().await;
            transport
                .request(request, Some(timeout.unwrap_or(server.timeout)))
                .await
        };
        let latency = started.elapsed();

        match result {
            Ok(response) => {
                discovery
                    .record_request(&server.id, !response.is_error(), latency)
                    .await;
                Ok(response)
            }
            Err(e) => {
                discovery.record_request(&server.id, false, latency).await;
                if matches!(e, GatewayError::Transport(_) | GatewayError::Timeout { .. }) {
                    self.invalidate(&server.id).await;
                }
                Err(e)
            }
        }
    }

    /// Close every pooled transport. Used at shutdown.
    pub async fn close_all(&self) {
        let mut transports = self.transports.lock().await;
        for (_, transport) in transports.drain() {
            let _ = transport.lock().await.close().await;
        }
    }

    /// Number of pooled transports, for introspection.
    pub async fn len(&self) -> usize {
        self.transports.lock().await.len()
    }

    /// Whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.transports.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerProtocol;

    #[tokio::test]
    async fn pool_reuses_transports_per_server() {
        let pool = BackendPool::new();
        let server = BackendServer::new_stdio("org", "local", "cat", vec![]);

        let first = pool.get_or_open(&server).await.unwrap();
        let second = pool.get_or_open(&server).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len().await, 1);

        pool.close_all().await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_forces_a_reopen() {
        let pool = BackendPool::new();
        let server = BackendServer::new_stdio("org", "local", "cat", vec![]);

        let first = pool.get_or_open(&server).await.unwrap();
        pool.invalidate(&server.id).await;
        let second = pool.get_or_open(&server).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        pool.close_all().await;
    }

    #[tokio::test]
    async fn unroutable_config_is_an_error() {
        let pool = BackendPool::new();
        let server = BackendServer::new_url("org", "t", ServerProtocol::Tcp, "tcp://x:1");
        assert!(pool.get_or_open(&server).await.is_err());
    }
}
