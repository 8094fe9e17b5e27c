//! Long-lived stdio process supervision.
//!
//! The `/stdio/process` surface manages named subprocesses that outlive
//! any single request: start, stop, restart, status, and raw JSON-RPC
//! sends. The supervisor doubles as the stdio liveness source for the
//! health registry, pinging whichever process is registered under a
//! server's id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use gateway_core::error::{GatewayError, GatewayResult, TransportError};
use gateway_core::messages::{JsonRpcRequest, JsonRpcResponse};
use gateway_core::transport::stdio::StdioTransport;
use gateway_core::transport::{StdioConfig, Transport};

use crate::discovery::StdioHealth;

/// Key used when a request does not name a specific process.
pub const DEFAULT_PROCESS: &str = "default";

/// Point-in-time view of one supervised process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    /// Whether a process is currently supervised and alive.
    pub running: bool,
    /// Its pid, when running.
    pub pid: Option<u32>,
    /// The configured command, when running.
    pub command: Option<String>,
}

type SharedProcess = Arc<Mutex<(StdioTransport, StdioConfig)>>;

/// Registry of supervised stdio processes, keyed by name or server id.
#[derive(Default)]
pub struct ProcessSupervisor {
    processes: Mutex<HashMap<String, SharedProcess>>,
}

impl ProcessSupervisor {
    /// Empty supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, key: &str) -> GatewayResult<SharedProcess> {
        self.processes
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                what: format!("process '{key}'"),
            })
    }

    /// Spawn and register a process under `key`.
    ///
    /// Starting over an already running process is a conflict; stop or
    /// restart it instead.
    pub async fn start(&self, key: &str, config: StdioConfig) -> GatewayResult<u32> {
        let mut processes = self.processes.lock().await;
        if processes.contains_key(key) {
            return Err(GatewayError::Conflict {
                reason: format!("process '{key}' is already running"),
            });
        }

        let mut transport = StdioTransport::new(config.clone());
        transport.connect().await?;
        let pid = transport.pid().ok_or_else(|| TransportError::Process {
            reason: "process exited immediately after spawn".to_string(),
        })?;

        processes.insert(key.to_string(), Arc::new(Mutex::new((transport, config))));
        info!(key, pid, "stdio process started");
        Ok(pid)
    }

    /// Stop and forget the process under `key`.
    pub async fn stop(&self, key: &str) -> GatewayResult<()> {
        let entry = {
            let mut processes = self.processes.lock().await;
            processes.remove(key).ok_or_else(|| GatewayError::NotFound {
                what: format!("process '{key}'"),
            })?
        };
        entry.lock().await.0.close().await?;
        info!(key, "stdio process stopped");
        Ok(())
    }

    /// Respawn the process under `key`, returning the new pid.
    pub async fn restart(&self, key: &str) -> GatewayResult<u32> {
        let entry = self.entry(key).await?;
        let mut guard = entry.lock().await;
        guard.0.restart().await?;
        let pid = guard.0.pid().ok_or_else(|| TransportError::Process {
            reason: "process exited immediately after respawn".to_string(),
        })?;
        info!(key, pid, "stdio process restarted");
        Ok(pid)
    }

    /// Status of the process under `key`; a missing key reads as not
    /// running rather than an error.
    pub async fn status(&self, key: &str) -> ProcessStatus {
        let Ok(entry) = self.entry(key).await else {
            return ProcessStatus {
                running: false,
                pid: None,
                command: None,
            };
        };
        let guard = entry.lock().await;
        ProcessStatus {
            running: guard.0.is_connected(),
            pid: guard.0.pid(),
            command: Some(guard.1.command.clone()),
        }
    }

    /// Forward one JSON-RPC request to the process and wait for its reply.
    pub async fn send(
        &self,
        key: &str,
        request: JsonRpcRequest,
        timeout: Option<Duration>,
    ) -> GatewayResult<JsonRpcResponse> {
        let entry = self.entry(key).await?;
        let mut guard = entry.lock().await;
        guard.0.request(request, timeout).await
    }

    /// Stop everything. Used at shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<SharedProcess> = {
            let mut processes = self.processes.lock().await;
            processes.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.lock().await.0.close().await;
        }
    }
}

#[async_trait]
impl StdioHealth for ProcessSupervisor {
    async fn ping(&self, server_id: &str) -> GatewayResult<()> {
        let entry = self.entry(server_id).await?;
        let mut guard = entry.lock().await;
        guard.0.health_check().await
    }
}
