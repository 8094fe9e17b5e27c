//! Stdio command execution and process control endpoints.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::info;

use gateway_core::error::{GatewayError, ProtocolError};
use gateway_core::messages::JsonRpcRequest;
use gateway_core::transport::StdioConfig;

use crate::supervisor::DEFAULT_PROCESS;

use super::{error_reply, SharedState};

/// Default deadline for one-shot command execution.
const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST /stdio/execute` and of `action=start`.
#[derive(Debug, Deserialize)]
pub struct CommandSpec {
    /// Command to run.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment merged over the inherited one.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Deadline in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl CommandSpec {
    fn timeout(&self) -> Duration {
        self.timeout
            .map_or(DEFAULT_EXECUTE_TIMEOUT, Duration::from_secs)
    }

    fn stdio_config(&self) -> StdioConfig {
        let mut config = StdioConfig::new(&self.command).timeout(self.timeout());
        config.args = self.args.clone();
        config.env = self.env.clone();
        config.working_dir = self.working_dir.clone();
        config
    }
}

/// `POST /stdio/execute`: run a command to completion and return its
/// captured output.
pub async fn handle_execute(
    State(_state): State<SharedState>,
    Json(spec): Json<CommandSpec>,
) -> Response {
    if spec.command.is_empty() {
        return error_reply(&GatewayError::Protocol(ProtocolError::InvalidRequest {
            reason: "'command' must be non-empty".to_string(),
        }));
    }

    let mut command = Command::new(&spec.command);
    command.args(&spec.args).envs(&spec.env).kill_on_drop(true);
    if let Some(ref dir) = spec.working_dir {
        command.current_dir(dir);
    }

    info!(command = %spec.command, "one-shot stdio execution");
    let started = std::time::Instant::now();
    match tokio::time::timeout(spec.timeout(), command.output()).await {
        Ok(Ok(output)) => Json(json!({
            "exit_code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "duration_ms": started.elapsed().as_millis() as u64,
            "timed_out": false,
        }))
        .into_response(),
        Ok(Err(e)) => error_reply(&GatewayError::Transport(
            gateway_core::error::TransportError::Process {
                reason: e.to_string(),
            },
        )),
        Err(_) => (
            StatusCode::OK,
            Json(json!({
                "exit_code": null,
                "stdout": "",
                "stderr": "",
                "duration_ms": started.elapsed().as_millis() as u64,
                "timed_out": true,
            })),
        )
            .into_response(),
    }
}

/// Query parameters of `/stdio/process`.
#[derive(Debug, Deserialize)]
pub struct ProcessQuery {
    /// One of `start`, `stop`, `restart`, `status`, `send`.
    pub action: String,
    /// Process name; also the server id for health probing.
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET|POST /stdio/process?action=...`: long-lived process control.
pub async fn handle_process(
    State(state): State<SharedState>,
    Query(query): Query<ProcessQuery>,
    body: Bytes,
) -> Response {
    let key = query.name.as_deref().unwrap_or(DEFAULT_PROCESS);

    match query.action.as_str() {
        "start" => {
            let spec: CommandSpec = match serde_json::from_slice(&body) {
                Ok(spec) => spec,
                Err(e) => {
                    return error_reply(&GatewayError::Protocol(ProtocolError::InvalidRequest {
                        reason: format!("invalid start body: {e}"),
                    }))
                }
            };
            match state.supervisor.start(key, spec.stdio_config()).await {
                Ok(pid) => Json(json!({ "started": true, "pid": pid })).into_response(),
                Err(e) => error_reply(&e),
            }
        }
        "stop" => match state.supervisor.stop(key).await {
            Ok(()) => Json(json!({ "stopped": true })).into_response(),
            Err(e) => error_reply(&e),
        },
        "restart" => match state.supervisor.restart(key).await {
            Ok(pid) => Json(json!({ "restarted": true, "pid": pid })).into_response(),
            Err(e) => error_reply(&e),
        },
        "status" => {
            let status = state.supervisor.status(key).await;
            Json(json!({
                "running": status.running,
                "pid": status.pid,
                "command": status.command,
            }))
            .into_response()
        }
        "send" => {
            let request: JsonRpcRequest = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => {
                    return error_reply(&GatewayError::Protocol(ProtocolError::InvalidRequest {
                        reason: format!("body must be a JSON-RPC request: {e}"),
                    }))
                }
            };
            match state.supervisor.send(key, request, None).await {
                Ok(response) => Json(response).into_response(),
                Err(e) => error_reply(&e),
            }
        }
        other => error_reply(&GatewayError::Protocol(ProtocolError::InvalidRequest {
            reason: format!("unknown action '{other}'"),
        })),
    }
}
