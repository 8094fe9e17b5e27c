//! Transport manager: the process-wide owner of live connections.
//!
//! One manager instance exists per gateway. It pairs every session with
//! an optional backend transport, pumps inbound transport events into the
//! session's event log, and keeps the aggregate counters the metrics
//! surface reports. Sends are serialized per session by the transport
//! lock, so caller order is preserved; nothing here blocks except the
//! final resource release inside close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use gateway_core::error::{GatewayError, GatewayResult};
use gateway_core::messages::JsonRpcMessage;
use gateway_core::transport::{
    EventKind, Transport, TransportConfig, TransportFactory, TransportKind,
};

use crate::session::{Session, SessionRegistry};
use crate::tasks::spawn_supervised;

/// A live connection: the session plus its backend transport, when the
/// session fronts one.
#[derive(Clone)]
pub struct ConnectionHandle {
    /// The session record.
    pub session: Arc<Session>,
    /// Backend transport; gateway-scoped sessions have none.
    pub transport: Option<Arc<Mutex<Box<dyn Transport>>>>,
    /// Wire kind of the client side.
    pub kind: TransportKind,
}

#[derive(Default)]
struct Counters {
    connections_total: AtomicU64,
    messages_total: AtomicU64,
    errors_total: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Factory, lookup, send, broadcast, and lifecycle for all connections.
pub struct TransportManager {
    sessions: SessionRegistry,
    connections: RwLock<HashMap<String, ConnectionHandle>>,
    counters: Counters,
}

impl TransportManager {
    /// Create a manager over the given session registry.
    pub fn new(sessions: SessionRegistry) -> Self {
        Self {
            sessions,
            connections: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// The session registry this manager allocates from.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Open a session, optionally connecting a backend transport for it.
    ///
    /// When a transport config is given the transport is constructed,
    /// connected, bound to the session id, and its inbound events are
    /// pumped into the session's event log by a supervised task.
    pub async fn create_connection(
        &self,
        kind: TransportKind,
        user_id: &str,
        organization_id: &str,
        server_id: Option<String>,
        config: Option<TransportConfig>,
    ) -> GatewayResult<ConnectionHandle> {
        let session = self
            .sessions
            .open(user_id, organization_id, server_id, kind)
            .await;

        let transport = match config {
            Some(config) => {
                let mut transport = TransportFactory::create(config)?;
                transport.connect().await?;
                transport.set_session_id(&session.id);

                if let Some(mut events) = transport.take_events() {
                    let pump_session = Arc::clone(&session);
                    spawn_supervised("event-pump", async move {
                        while let Some(event) = events.recv().await {
                            let done = event.kind == EventKind::Close;
                            pump_session.record(event).await;
                            if done {
                                break;
                            }
                        }
                        debug!(session_id = %pump_session.id, "event pump finished");
                    });
                }

                Some(Arc::new(Mutex::new(transport)))
            }
            None => None,
        };

        let handle = ConnectionHandle {
            session: Arc::clone(&session),
            transport,
            kind,
        };
        self.connections
            .write()
            .await
            .insert(session.id.clone(), handle.clone());
        self.counters.connections_total.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Look up a live connection by session id.
    pub async fn get_connection(&self, session_id: &str) -> GatewayResult<ConnectionHandle> {
        self.connections
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Send a message on a session's wire.
    ///
    /// The message is also recorded in the session's event log so SSE and
    /// streamable clients see it (and can replay it) on their stream.
    pub async fn send_message(
        &self,
        session_id: &str,
        message: JsonRpcMessage,
    ) -> GatewayResult<()> {
        let handle = self.get_connection(session_id).await?;

        if let Some(ref transport) = handle.transport {
            let result = transport.lock().await.send(message.clone()).await;
            if let Err(e) = result {
                self.counters.errors_total.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        }

        let bytes = serde_json::to_vec(&message).map(|v| v.len()).unwrap_or(0);
        handle
            .session
            .append_event(
                EventKind::Message,
                serde_json::to_value(&message).unwrap_or(serde_json::Value::Null),
            )
            .await;
        self.counters.messages_total.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_out
            .fetch_add(bytes as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Best-effort send to every open session of one transport kind.
    ///
    /// Failures are collected per session and never abort the sweep.
    pub async fn broadcast_message(
        &self,
        kind: TransportKind,
        message: JsonRpcMessage,
    ) -> Vec<(String, GatewayError)> {
        let targets: Vec<String> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, h)| h.kind == kind)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut failures = Vec::new();
        for session_id in targets {
            if let Err(e) = self.send_message(&session_id, message.clone()).await {
                warn!(session_id, "broadcast delivery failed: {e}");
                failures.push((session_id, e));
            }
        }
        failures
    }

    /// Close a connection: release the transport first, then drop the
    /// handle, then close the session record.
    pub async fn close_connection(&self, session_id: &str) -> GatewayResult<()> {
        let handle = self.get_connection(session_id).await?;

        if let Some(ref transport) = handle.transport {
            transport.lock().await.close().await?;
        }

        self.connections.write().await.remove(session_id);

        // Streaming wires keep their event log for replay; one-shot wires
        // have nothing to replay.
        let retain = matches!(handle.kind, TransportKind::Sse | TransportKind::Http);
        self.sessions.close(session_id, retain).await?;
        Ok(())
    }

    /// Probe every live backend transport, reporting per-kind outcomes.
    pub async fn health_check(&self) -> HashMap<TransportKind, Result<(), String>> {
        let handles: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        let mut results: HashMap<TransportKind, Result<(), String>> = HashMap::new();
        for handle in handles {
            let Some(ref transport) = handle.transport else {
                results.entry(handle.kind).or_insert(Ok(()));
                continue;
            };
            let outcome = transport.lock().await.health_check().await;
            match outcome {
                Ok(()) => {
                    results.entry(handle.kind).or_insert(Ok(()));
                }
                Err(e) => {
                    results.insert(handle.kind, Err(e.to_string()));
                }
            }
        }
        results
    }

    /// Aggregate counters as a flat map.
    pub async fn metrics(&self) -> HashMap<String, u64> {
        let mut bytes_in = self.counters.bytes_in.load(Ordering::Relaxed);
        let mut bytes_out = self.counters.bytes_out.load(Ordering::Relaxed);
        let mut errors = self.counters.errors_total.load(Ordering::Relaxed);

        {
            let connections = self.connections.read().await;
            for handle in connections.values() {
                if let Some(ref transport) = handle.transport {
                    let status = transport.lock().await.status();
                    bytes_in += status.bytes_in;
                    bytes_out += status.bytes_out;
                    errors += status.errors;
                }
            }
        }

        let active = self.connections.read().await.len() as u64;
        HashMap::from([
            (
                "connections_total".to_string(),
                self.counters.connections_total.load(Ordering::Relaxed),
            ),
            ("active_connections".to_string(), active),
            (
                "messages_total".to_string(),
                self.counters.messages_total.load(Ordering::Relaxed),
            ),
            ("errors_total".to_string(), errors),
            ("bytes_in".to_string(), bytes_in),
            ("bytes_out".to_string(), bytes_out),
        ])
    }

    /// Close every connection. Used at shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.close_connection(&id).await {
                warn!(session_id = %id, "close during shutdown failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager() -> TransportManager {
        TransportManager::new(SessionRegistry::new(1024, Duration::from_secs(1800)))
    }

    #[tokio::test]
    async fn connection_is_resolvable_until_closed() {
        let manager = manager();
        let handle = manager
            .create_connection(TransportKind::Sse, "u1", "o1", None, None)
            .await
            .unwrap();
        let session_id = handle.session.id.clone();

        assert!(manager.get_connection(&session_id).await.is_ok());

        manager.close_connection(&session_id).await.unwrap();
        assert!(matches!(
            manager.get_connection(&session_id).await,
            Err(GatewayError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stdio_backend_connection_gets_a_pid() {
        let manager = manager();
        let config = TransportConfig::stdio("cat", &[] as &[String]);
        let handle = manager
            .create_connection(
                TransportKind::Stdio,
                "u1",
                "o1",
                Some("server-1".to_string()),
                Some(config),
            )
            .await
            .unwrap();

        let transport = handle.transport.as_ref().unwrap();
        {
            let transport = transport.lock().await;
            assert!(transport.pid().unwrap() > 0);
            assert_eq!(transport.session_id().unwrap(), handle.session.id);
        }

        manager.close_connection(&handle.session.id).await.unwrap();
    }

    #[tokio::test]
    async fn send_records_an_event_on_transportless_sessions() {
        let manager = manager();
        let handle = manager
            .create_connection(TransportKind::Sse, "u1", "o1", None, None)
            .await
            .unwrap();

        let message = JsonRpcMessage::Notification(
            gateway_core::messages::JsonRpcNotification::without_params("tick"),
        );
        manager
            .send_message(&handle.session.id, message)
            .await
            .unwrap();

        // connected + message
        let events = handle.session.events_after(0).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Message);
    }

    #[tokio::test]
    async fn broadcast_skips_other_kinds_and_collects_failures() {
        let manager = manager();
        let sse = manager
            .create_connection(TransportKind::Sse, "u1", "o1", None, None)
            .await
            .unwrap();
        let ws = manager
            .create_connection(TransportKind::Websocket, "u1", "o1", None, None)
            .await
            .unwrap();

        let message = JsonRpcMessage::Notification(
            gateway_core::messages::JsonRpcNotification::without_params("announce"),
        );
        let failures = manager
            .broadcast_message(TransportKind::Sse, message)
            .await;
        assert!(failures.is_empty());

        assert_eq!(sse.session.events_after(0).await.len(), 2);
        // The websocket session saw nothing.
        assert_eq!(ws.session.events_after(0).await.len(), 1);
    }

    #[tokio::test]
    async fn metrics_track_connections_and_messages() {
        let manager = manager();
        let handle = manager
            .create_connection(TransportKind::Sse, "u1", "o1", None, None)
            .await
            .unwrap();
        manager
            .send_message(
                &handle.session.id,
                JsonRpcMessage::Notification(
                    gateway_core::messages::JsonRpcNotification::without_params("x"),
                ),
            )
            .await
            .unwrap();

        let metrics = manager.metrics().await;
        assert_eq!(metrics["connections_total"], 1);
        assert_eq!(metrics["active_connections"], 1);
        assert_eq!(metrics["messages_total"], 1);
        assert!(metrics["bytes_out"] > 0);

        manager.close_connection(&handle.session.id).await.unwrap();
        let metrics = manager.metrics().await;
        assert_eq!(metrics["active_connections"], 0);
        assert_eq!(metrics["connections_total"], 1);
    }

    #[tokio::test]
    async fn backend_events_are_pumped_into_the_session_log() {
        let manager = manager();
        // `sh -c` writes one notification to stdout then exits; the pump
        // must record the message, the synthetic exit error, and close.
        let config = TransportConfig::stdio(
            "sh",
            &[
                "-c".to_string(),
                r#"printf '{"jsonrpc":"2.0","method":"hello"}\n'"#.to_string(),
            ],
        );
        let handle = manager
            .create_connection(TransportKind::Stdio, "u1", "o1", None, Some(config))
            .await
            .unwrap();

        // Give the pump a moment to drain the short-lived process.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let events = handle.session.events_after(0).await;
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::Message));
        assert!(kinds.contains(&EventKind::Error));
        assert!(kinds.contains(&EventKind::Close));
    }
}
