//! Stdio transport: a supervised local subprocess speaking
//! newline-delimited JSON-RPC over stdin/stdout.
//!
//! Three background tasks run per live process: a stdout reader that
//! correlates responses and surfaces everything else as events, a stderr
//! reader that turns diagnostic lines into `custom` events, and a stdin
//! writer fed by a channel so outbound writes are serialized. Unexpected
//! child exit produces a synthetic `error` event carrying the exit code.
//!
//! Shutdown is graceful: SIGTERM first, SIGKILL once the grace period
//! lapses. The child is also killed on drop so no exit path leaks a
//! process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::{Capability, Transport, TransportEvent, TransportKind, TransportStatus};
use crate::error::{GatewayResult, TransportError};
use crate::messages::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::transport::config::StdioConfig;

/// How long a terminated child gets to exit before SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// A running child process plus its I/O plumbing.
struct ProcessHandle {
    pid: u32,
    child: Arc<Mutex<Child>>,
    stdin_tx: mpsc::UnboundedSender<String>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    /// Set before an intentional kill so the exit watcher stays quiet.
    closing: Arc<AtomicBool>,
}

/// Subprocess transport for local MCP servers.
pub struct StdioTransport {
    config: StdioConfig,
    grace_period: Duration,
    status: TransportStatus,
    session_id: Option<String>,
    pending: PendingMap,
    process: Option<ProcessHandle>,
}

impl StdioTransport {
    /// Create a transport for the given subprocess configuration.
    ///
    /// Nothing is spawned until [`Transport::connect`].
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            grace_period: DEFAULT_GRACE_PERIOD,
            status: TransportStatus::new(TransportKind::Stdio),
            session_id: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            process: None,
        }
    }

    /// Override the SIGTERM→SIGKILL grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Spawn the child and wire up the reader/writer tasks.
    fn spawn_process(&self) -> GatewayResult<ProcessHandle> {
        debug!(command = %self.config.command, args = ?self.config.args, "spawning stdio backend");

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| TransportError::Process {
            reason: format!("failed to spawn '{}': {e}", self.config.command),
        })?;

        let pid = child.id().ok_or_else(|| TransportError::Process {
            reason: "child exited before a pid could be read".to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TransportError::Process {
            reason: "child stdin unavailable after spawn".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Process {
            reason: "child stdout unavailable after spawn".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| TransportError::Process {
            reason: "child stderr unavailable after spawn".to_string(),
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let child = Arc::new(Mutex::new(child));
        let closing = Arc::new(AtomicBool::new(false));

        // Writer: serialize all stdin writes through one task.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = stdin_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            debug!("stdio writer task finished");
        });

        // Stdout reader: correlate responses, surface the rest as events.
        // On EOF, harvest the exit status and emit a synthetic error event
        // unless the close was requested by us.
        let pending = Arc::clone(&self.pending);
        let reader_events = events_tx.clone();
        let reader_child = Arc::clone(&child);
        let reader_closing = Arc::clone(&closing);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                            Ok(JsonRpcMessage::Response(response)) => {
                                let waiter =
                                    pending.lock().await.remove(&response.id.to_string());
                                match waiter {
                                    Some(tx) => {
                                        let _ = tx.send(response);
                                    }
                                    None => {
                                        // Response nobody asked for; keep it
                                        // observable through the event log.
                                        let _ = reader_events.send(TransportEvent::message(
                                            &JsonRpcMessage::Response(response),
                                        ));
                                    }
                                }
                            }
                            Ok(message) => {
                                if reader_events.send(TransportEvent::message(&message)).is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(line = trimmed, "unparseable line on backend stdout: {e}");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("error reading backend stdout: {e}");
                        break;
                    }
                }
            }

            // Stdout closed: the process is gone or going. Report how.
            let exit_code = {
                let mut child = reader_child.lock().await;
                match timeout(Duration::from_secs(2), child.wait()).await {
                    Ok(Ok(status)) => status.code(),
                    _ => None,
                }
            };
            if !reader_closing.load(Ordering::SeqCst) {
                warn!(?exit_code, "stdio backend exited unexpectedly");
                let _ = reader_events.send(TransportEvent::new(
                    super::EventKind::Error,
                    json!({
                        "reason": "process exited unexpectedly",
                        "exit_code": exit_code,
                    }),
                ));
            }
            let _ = reader_events.send(TransportEvent::close());
            debug!("stdio reader task finished");
        });

        // Stderr reader: diagnostics only, never fatal.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                warn!(target: "gateway_core::stdio", "backend stderr: {line}");
                let event = TransportEvent::new(
                    super::EventKind::Custom,
                    json!({ "stream": "stderr", "line": line }),
                );
                if events_tx.send(event).is_err() {
                    break;
                }
            }
            debug!("stdio stderr task finished");
        });

        Ok(ProcessHandle {
            pid,
            child,
            stdin_tx,
            events_rx: Some(events_rx),
            closing,
        })
    }

    /// Terminate the current child: SIGTERM, grace period, then SIGKILL.
    async fn terminate(&mut self) -> GatewayResult<()> {
        let Some(handle) = self.process.take() else {
            return Ok(());
        };
        handle.closing.store(true, Ordering::SeqCst);

        let mut child = handle.child.lock().await;
        if child.try_wait().ok().flatten().is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            // SAFETY: the pid came from a child we spawned and have not
            // reaped yet.
            unsafe {
                libc::kill(handle.pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        match timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "stdio backend exited after SIGTERM");
            }
            Ok(Err(e)) => {
                warn!("error waiting for stdio backend: {e}");
            }
            Err(_) => {
                warn!(pid = handle.pid, "grace period elapsed, sending SIGKILL");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let handle = self.spawn_process()?;
        self.status.mark_connected();
        self.status
            .add_metadata("pid", serde_json::json!(handle.pid));
        self.status
            .add_metadata("command", serde_json::json!(self.config.command));
        self.process = Some(handle);
        Ok(())
    }

    async fn close(&mut self) -> GatewayResult<()> {
        self.terminate().await?;
        // Fail any callers still waiting on a response.
        self.pending.lock().await.clear();
        self.status.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.process.is_some()
    }

    async fn send(&mut self, message: JsonRpcMessage) -> GatewayResult<()> {
        let handle = self
            .process
            .as_ref()
            .ok_or(TransportError::NotConnected {
                transport_type: "stdio",
            })?;

        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let bytes = line.len();

        handle
            .stdin_tx
            .send(line)
            .map_err(|_| TransportError::SendFailed {
                transport_type: "stdio",
                reason: "writer task has exited".to_string(),
            })?;

        self.status.record_sent(bytes);
        Ok(())
    }

    async fn request(
        &mut self,
        request: JsonRpcRequest,
        timeout_duration: Option<Duration>,
    ) -> GatewayResult<JsonRpcResponse> {
        let request_id = request.id.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(e) = self.send(JsonRpcMessage::Request(request)).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        let deadline = timeout_duration.unwrap_or(self.config.timeout);
        match timeout(deadline, rx).await {
            Ok(Ok(response)) => {
                self.status
                    .record_received(response.result.as_ref().map_or(0, |v| v.to_string().len()));
                Ok(response)
            }
            Ok(Err(_)) => {
                self.status.record_error();
                Err(TransportError::Process {
                    reason: "response channel closed before a reply arrived".to_string(),
                }
                .into())
            }
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                self.status.record_error();
                Err(crate::error::GatewayError::timeout(
                    format!("stdio request {request_id}"),
                    deadline,
                ))
            }
        }
    }

    async fn receive(&mut self) -> GatewayResult<Option<TransportEvent>> {
        let rx = match self.process.as_mut().and_then(|h| h.events_rx.as_mut()) {
            Some(rx) => rx,
            None => return Ok(None),
        };
        Ok(rx.recv().await)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.process.as_mut().and_then(|h| h.events_rx.take())
    }

    fn set_session_id(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
        self.status
            .add_metadata("session_id", serde_json::json!(session_id));
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    async fn health_check(&mut self) -> GatewayResult<()> {
        let handle = self
            .process
            .as_ref()
            .ok_or(TransportError::NotConnected {
                transport_type: "stdio",
            })?;

        // Reaped or reapable means dead.
        if handle.child.lock().await.try_wait().ok().flatten().is_some() {
            return Err(TransportError::Process {
                reason: "backend process has exited".to_string(),
            }
            .into());
        }

        // A live process must still answer JSON-RPC; any reply counts,
        // including a method-not-found error.
        let ping = JsonRpcRequest::with_random_id("ping", json!({}));
        self.request(ping, Some(Duration::from_secs(5))).await?;
        Ok(())
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[
            Capability::ExecuteCommand,
            Capability::RestartProcess,
            Capability::Pid,
        ]
    }

    fn status(&self) -> TransportStatus {
        let mut status = self.status.clone();
        status.add_metadata("args", serde_json::json!(self.config.args));
        status.add_metadata(
            "timeout_secs",
            serde_json::json!(self.config.timeout.as_secs()),
        );
        status
    }

    fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|h| h.pid)
    }

    /// Close and respawn in one step.
    ///
    /// The exclusive receiver guarantees no send can interleave between
    /// the teardown and the fresh spawn.
    async fn restart(&mut self) -> GatewayResult<()> {
        self.terminate().await?;
        self.pending.lock().await.clear();

        let handle = self.spawn_process()?;
        self.status.mark_connected();
        self.status
            .add_metadata("pid", serde_json::json!(handle.pid));
        self.process = Some(handle);
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Best-effort, non-blocking kill; kill_on_drop covers the rest.
        if let Some(handle) = self.process.take() {
            handle.closing.store(true, Ordering::SeqCst);
            if let Ok(mut child) = handle.child.try_lock() {
                let _ = child.start_kill();
            }
        }
    }
}
