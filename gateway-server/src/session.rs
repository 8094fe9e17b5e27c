//! Session registry and per-session event store.
//!
//! Every client connection gets a [`Session`]: an identity (user, org,
//! optionally a bound backend server), activity timestamps, and a ring
//! buffer of [`SessionEvent`]s with strictly increasing ids. Live
//! subscribers get events over a broadcast channel; reconnecting clients
//! replay from the ring using `Last-Event-ID` or a timestamp.
//!
//! The registry is the sole owner of session lifetimes. Closing a session
//! keeps its event log around for one sweeper grace period when the
//! transport supports replay, so an SSE client that reconnects right
//! after a drop still finds its history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use gateway_core::error::{GatewayError, GatewayResult};
use gateway_core::transport::{EventKind, TransportEvent, TransportKind};

/// One recorded occurrence on a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    /// Strictly increasing, unique per session.
    pub event_id: u64,
    /// Owning session.
    pub session_id: String,
    /// Event type.
    pub kind: EventKind,
    /// Payload.
    pub data: Value,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// A single client's logical connection.
pub struct Session {
    /// Opaque session id (UUID v4).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Bound backend server, empty for gateway-scoped sessions.
    pub server_id: Option<String>,
    /// Which wire the client attached over.
    pub transport_kind: TransportKind,
    /// Creation time.
    pub created_at: DateTime<Utc>,

    events: RwLock<VecDeque<SessionEvent>>,
    capacity: usize,
    next_event_id: AtomicU64,
    tx: broadcast::Sender<SessionEvent>,
    last_activity: RwLock<Instant>,
    closed_at: RwLock<Option<Instant>>,
}

impl Session {
    fn new(
        user_id: String,
        organization_id: String,
        server_id: Option<String>,
        transport_kind: TransportKind,
        capacity: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            organization_id,
            server_id,
            transport_kind,
            created_at: Utc::now(),
            events: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            next_event_id: AtomicU64::new(1),
            tx,
            last_activity: RwLock::new(Instant::now()),
            closed_at: RwLock::new(None),
        }
    }

    /// Record an event: assign the next id, append to the ring (evicting
    /// the oldest entry on overflow), and fan out to live subscribers.
    pub async fn append_event(&self, kind: EventKind, data: Value) -> u64 {
        let event_id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = SessionEvent {
            event_id,
            session_id: self.id.clone(),
            kind,
            data,
            timestamp: Utc::now(),
        };

        {
            let mut events = self.events.write().await;
            if events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }

        let _ = self.tx.send(event);
        self.touch().await;
        event_id
    }

    /// Record a transport event verbatim.
    pub async fn record(&self, event: TransportEvent) -> u64 {
        self.append_event(event.kind, event.data).await
    }

    /// Events with ids strictly greater than `after`, oldest first.
    pub async fn events_after(&self, after: u64) -> Vec<SessionEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.event_id > after)
            .cloned()
            .collect()
    }

    /// Events recorded at or after the given wall-clock instant.
    pub async fn events_since(&self, since: DateTime<Utc>) -> Vec<SessionEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    /// The most recent `n` events, oldest first.
    pub async fn latest(&self, n: usize) -> Vec<SessionEvent> {
        let events = self.events.read().await;
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    /// Subscribe to live events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Refresh the activity timestamp.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    /// Whether this session has been closed.
    pub async fn is_closed(&self) -> bool {
        self.closed_at.read().await.is_some()
    }

    async fn mark_closed(&self) {
        let mut closed = self.closed_at.write().await;
        if closed.is_none() {
            *closed = Some(Instant::now());
        }
    }

    /// Whether the session is past the idle (or post-close grace) window.
    pub async fn is_expired(&self, idle_timeout: Duration) -> bool {
        if let Some(closed_at) = *self.closed_at.read().await {
            return closed_at.elapsed() > idle_timeout;
        }
        self.last_activity.read().await.elapsed() > idle_timeout
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transport_kind", &self.transport_kind)
            .field("server_id", &self.server_id)
            .finish()
    }
}

/// Process-wide map of live (and recently closed) sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    capacity: usize,
    idle_timeout: Duration,
}

impl SessionRegistry {
    /// Create a registry with the given per-session ring capacity and
    /// idle timeout.
    pub fn new(capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            idle_timeout,
        }
    }

    /// Open a new session and record its `connected` event.
    pub async fn open(
        &self,
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        server_id: Option<String>,
        transport_kind: TransportKind,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(
            user_id.into(),
            organization_id.into(),
            server_id,
            transport_kind,
            self.capacity,
        ));
        session
            .append_event(EventKind::Connected, Value::Null)
            .await;

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), Arc::clone(&session));
        info!(session_id = %session.id, kind = %transport_kind, "session opened");
        session
    }

    /// Look up a session by id.
    pub async fn get(&self, session_id: &str) -> GatewayResult<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Close a session.
    ///
    /// With `retain_log` the session stays resolvable for replay until the
    /// sweeper's grace period lapses; otherwise it is removed immediately.
    pub async fn close(&self, session_id: &str, retain_log: bool) -> GatewayResult<()> {
        let session = self.get(session_id).await?;
        session.append_event(EventKind::Close, Value::Null).await;
        session.mark_closed().await;

        if !retain_log {
            self.sessions.write().await.remove(session_id);
        }
        info!(session_id, retain_log, "session closed");
        Ok(())
    }

    /// Number of sessions currently resolvable.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// All sessions of a given transport kind that are still open.
    pub async fn of_kind(&self, kind: TransportKind) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        let mut matching = Vec::new();
        for session in sessions.values() {
            if session.transport_kind == kind && !session.is_closed().await {
                matching.push(Arc::clone(session));
            }
        }
        matching
    }

    /// Drop sessions past their idle timeout or post-close grace period.
    pub async fn sweep(&self) -> usize {
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.is_expired(self.idle_timeout).await {
                    expired.push(id.clone());
                }
            }
        }

        let count = expired.len();
        if count > 0 {
            let mut sessions = self.sessions.write().await;
            for id in expired {
                sessions.remove(&id);
                debug!(session_id = %id, "session reaped");
            }
        }
        count
    }

    /// Spawn the background sweeper. The returned handle aborts it.
    pub fn start_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let reaped = registry.sweep().await;
                if reaped > 0 {
                    debug!(reaped, "session sweep complete");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(1024, Duration::from_secs(1800))
    }

    #[tokio::test]
    async fn open_assigns_uuid_and_records_connected() {
        let registry = registry();
        let session = registry
            .open("u1", "o1", None, TransportKind::Sse)
            .await;

        assert!(Uuid::parse_str(&session.id).is_ok());
        let events = session.events_after(0).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Connected);
        assert_eq!(events[0].event_id, 1);
    }

    #[tokio::test]
    async fn event_ids_are_strictly_increasing_without_gaps() {
        let registry = registry();
        let session = registry
            .open("u1", "o1", None, TransportKind::Sse)
            .await;

        for i in 0..50 {
            session
                .append_event(EventKind::Message, json!({ "n": i }))
                .await;
        }

        let events = session.events_after(0).await;
        let ids: Vec<u64> = events.iter().map(|e| e.event_id).collect();
        for window in ids.windows(2) {
            assert_eq!(window[1], window[0] + 1);
        }
    }

    #[tokio::test]
    async fn ring_overflow_evicts_oldest() {
        let small = SessionRegistry::new(10, Duration::from_secs(1800));
        let session = small.open("u1", "o1", None, TransportKind::Sse).await;

        for i in 0..25 {
            session
                .append_event(EventKind::Message, json!({ "n": i }))
                .await;
        }

        let events = session.events_after(0).await;
        assert_eq!(events.len(), 10);
        // Ids stay contiguous even across eviction.
        assert_eq!(events.first().unwrap().event_id, 16);
        assert_eq!(events.last().unwrap().event_id, 25);
    }

    #[tokio::test]
    async fn replay_after_an_id_skips_delivered_events() {
        let registry = registry();
        let session = registry
            .open("u1", "o1", None, TransportKind::Sse)
            .await;
        session.append_event(EventKind::Message, json!(1)).await; // id 2
        session.append_event(EventKind::Message, json!(2)).await; // id 3

        let replay = session.events_after(1).await;
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].event_id, 2);
        assert_eq!(replay[1].event_id, 3);
    }

    #[tokio::test]
    async fn events_since_filters_by_timestamp() {
        let registry = registry();
        let session = registry
            .open("u1", "o1", None, TransportKind::Sse)
            .await;

        let cutoff = Utc::now();
        session.append_event(EventKind::Message, json!("late")).await;

        let since = session.events_since(cutoff).await;
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].data, json!("late"));
    }

    #[tokio::test]
    async fn latest_returns_tail_in_order() {
        let registry = registry();
        let session = registry
            .open("u1", "o1", None, TransportKind::Sse)
            .await;
        for i in 0..5 {
            session.append_event(EventKind::Message, json!(i)).await;
        }

        let tail = session.latest(2).await;
        assert_eq!(tail.len(), 2);
        assert!(tail[0].event_id < tail[1].event_id);
        assert_eq!(tail[1].data, json!(4));
    }

    #[tokio::test]
    async fn lookup_fails_after_unretained_close() {
        let registry = registry();
        let session = registry
            .open("u1", "o1", None, TransportKind::Http)
            .await;
        let id = session.id.clone();

        assert!(registry.get(&id).await.is_ok());
        registry.close(&id, false).await.unwrap();
        assert!(matches!(
            registry.get(&id).await,
            Err(GatewayError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn retained_close_keeps_log_until_sweep() {
        let registry = SessionRegistry::new(1024, Duration::from_millis(10));
        let session = registry
            .open("u1", "o1", None, TransportKind::Sse)
            .await;
        let id = session.id.clone();

        registry.close(&id, true).await.unwrap();
        // Still resolvable for replay right after close.
        let kept = registry.get(&id).await.unwrap();
        assert!(kept.is_closed().await);
        assert!(!kept.events_after(0).await.is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.sweep().await, 1);
        assert!(registry.get(&id).await.is_err());
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let registry = SessionRegistry::new(1024, Duration::from_millis(10));
        let session = registry
            .open("u1", "o1", None, TransportKind::Websocket)
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.sweep().await, 1);
        assert!(registry.get(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn broadcast_delivers_live_events() {
        let registry = registry();
        let session = registry
            .open("u1", "o1", None, TransportKind::Sse)
            .await;

        let mut rx = session.subscribe();
        session
            .append_event(EventKind::Message, json!({"live": true}))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data, json!({"live": true}));
    }
}
