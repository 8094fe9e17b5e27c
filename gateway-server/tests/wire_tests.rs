//! End-to-end tests over the real HTTP surface.

mod common;

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

use gateway_core::transport::{EventKind, TransportKind};
use gateway_server::config::ZERO_ORG;

use common::{mount_mcp_backend, test_gateway};

/// Read SSE frames from a response stream until `predicate` is satisfied
/// or the deadline lapses, returning the raw text seen so far.
async fn read_sse_until(
    response: reqwest::Response,
    deadline: Duration,
    predicate: impl Fn(&str) -> bool,
) -> String {
    let mut stream = response.bytes_stream();
    let mut seen = String::new();
    let _ = tokio::time::timeout(deadline, async {
        while let Some(Ok(chunk)) = stream.next().await {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if predicate(&seen) {
                break;
            }
        }
    })
    .await;
    seen
}

/// Event ids present in a raw SSE transcript.
fn sse_event_ids(raw: &str) -> Vec<u64> {
    raw.lines()
        .filter_map(|line| line.strip_prefix("id:"))
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

#[tokio::test]
async fn health_endpoint_reports_service() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "mcp-gateway");

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn initialize_over_rpc_endpoint() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/rpc"))
        .json(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": { "protocolVersion": "2024-11-05" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "mcp-gateway");

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn parse_errors_are_http_400() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/rpc"))
        .header("content-type", "application/json")
        .body("{nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!(-32700));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn internal_errors_are_http_500_with_sanitized_body() {
    let tg = test_gateway().await;
    // One mapped backend that refuses connections: the whole fan-out
    // fails, which is the internal-error path.
    let id = tg
        .register_http(ZERO_ORG, "dead", "http://127.0.0.1:1")
        .await;
    tg.put_namespace(ZERO_ORG, "default", &[&id]).await;
    let base = tg.serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/rpc"))
        .json(&json!({ "jsonrpc": "2.0", "id": 8, "method": "tools/list" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], json!(8));
    assert_eq!(body["error"]["code"], json!(-32603));
    assert_eq!(
        body["error"]["message"],
        "An internal error occurred. Please try again later."
    );

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn scalar_params_are_invalid_params_over_the_wire() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/rpc"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping", "params": 5 }))
        .send()
        .await
        .unwrap();
    // Misshapen params are a routed error, not a structural rejection.
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!(-32602));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn notification_only_payload_is_204() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/rpc"))
        .json(&json!([{ "jsonrpc": "2.0", "method": "notifications/initialized" }]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn server_bound_rpc_forwards_to_backend() {
    let tg = test_gateway().await;
    let backend = wiremock::MockServer::start().await;
    mount_mcp_backend(&backend, &["echo"]).await;
    let id = tg.register_http(ZERO_ORG, "A", &backend.uri()).await;
    let base = tg.serve().await;

    let body: Value = reqwest::Client::new()
        .post(format!("{base}/servers/{id}/rpc"))
        .json(&json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": { "name": "echo", "arguments": {} }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["id"], json!(3));
    assert_eq!(body["result"]["called"], "echo");

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn sse_stream_replays_after_last_event_id() {
    let tg = test_gateway().await;
    let base = tg.serve().await;
    let client = reqwest::Client::new();

    // First connection allocates the session.
    let first = client
        .get(format!("{base}/sse"))
        .send()
        .await
        .unwrap();
    let session_id = first
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // Record events 2 and 3 (1 is `connected`), then drop the stream.
    let session = tg.state.sessions.get(&session_id).await.unwrap();
    session.append_event(EventKind::Message, json!({"n": 2})).await;
    session.append_event(EventKind::Message, json!({"n": 3})).await;
    drop(first);

    // Reconnect replaying everything after event 1.
    let second = client
        .get(format!("{base}/sse?sessionId={session_id}"))
        .header("Last-Event-ID", "1")
        .send()
        .await
        .unwrap();
    let raw = read_sse_until(second, Duration::from_secs(5), |s| s.contains("id: 3") || s.contains("id:3")).await;

    let ids = sse_event_ids(&raw);
    assert_eq!(ids, vec![2, 3], "replay must be 2,3 in order with no duplicates: {raw}");

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn streamable_post_allocates_and_reuses_sessions() {
    let tg = test_gateway().await;
    let base = tg.serve().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/mcp"))
        .json(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": { "protocolVersion": "2024-11-05" }
        }))
        .send()
        .await
        .unwrap();
    let session_id = first
        .headers()
        .get("mcp-session-id")
        .expect("initialize allocates a session")
        .to_str()
        .unwrap()
        .to_string();
    assert!(first.headers().get("x-session-id").is_some());
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");

    // Follow-up with the session header reuses the same session.
    let second = client
        .post(format!("{base}/mcp"))
        .header("mcp-session-id", &session_id)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(
        second.headers().get("mcp-session-id").unwrap().to_str().unwrap(),
        session_id
    );

    // Both responses were recorded for replay.
    let session = tg.state.sessions.get(&session_id).await.unwrap();
    let events = session.events_after(0).await;
    let messages = events
        .iter()
        .filter(|e| e.kind == EventKind::Message)
        .count();
    assert_eq!(messages, 2);

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn streamable_post_stateless_without_session_markers() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert!(response.headers().get("mcp-session-id").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], json!(1));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn streamable_answers_sse_when_accept_asks() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .header("accept", "text/event-stream")
        .json(&json!({ "jsonrpc": "2.0", "id": 4, "method": "ping" }))
        .send()
        .await
        .unwrap();
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");

    let raw = read_sse_until(response, Duration::from_secs(5), |s| s.contains("data:")).await;
    let data_line = raw
        .lines()
        .find_map(|l| l.strip_prefix("data:"))
        .expect("sse data frame");
    let body: Value = serde_json::from_str(data_line.trim()).unwrap();
    assert_eq!(body["id"], json!(4));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn stdio_process_lifecycle_over_http() {
    let tg = test_gateway().await;
    let base = tg.serve().await;
    let client = reqwest::Client::new();

    // start
    let started: Value = client
        .post(format!("{base}/stdio/process?action=start&name=s6"))
        .json(&json!({ "command": "cat" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let pid = started["pid"].as_u64().expect("pid");
    assert!(pid > 0);

    // status
    let status: Value = client
        .get(format!("{base}/stdio/process?action=status&name=s6"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], json!(true));
    assert_eq!(status["pid"], json!(pid));

    // restart gets a new pid
    let restarted: Value = client
        .post(format!("{base}/stdio/process?action=restart&name=s6"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let new_pid = restarted["pid"].as_u64().unwrap();
    assert_ne!(pid, new_pid);

    // stop; the pid must leave the process table within the grace period
    let stopped: Value = client
        .post(format!("{base}/stdio/process?action=stop&name=s6"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["stopped"], json!(true));

    let status: Value = client
        .get(format!("{base}/stdio/process?action=status&name=s6"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], json!(false));

    #[cfg(unix)]
    {
        let alive = unsafe { libc::kill(new_pid as i32, 0) } == 0;
        assert!(!alive, "pid {new_pid} still alive after stop");
    }

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn stdio_send_round_trips_a_ping() {
    let tg = test_gateway().await;
    let base = tg.serve().await;
    let client = reqwest::Client::new();

    // A minimal reflector: answers every line with a canned response
    // carrying id 7.
    client
        .post(format!("{base}/stdio/process?action=start&name=reflector"))
        .json(&json!({
            "command": "sh",
            "args": ["-c",
                "while read -r line; do printf '{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\\n'; done"]
        }))
        .send()
        .await
        .unwrap();

    let reply: Value = client
        .post(format!("{base}/stdio/process?action=send&name=reflector"))
        .json(&json!({ "jsonrpc": "2.0", "id": 7, "method": "ping" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["id"], json!(7));
    assert!(reply.get("result").is_some());

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn stdio_execute_runs_to_completion() {
    let tg = test_gateway().await;
    let base = tg.serve().await;

    let body: Value = reqwest::Client::new()
        .post(format!("{base}/stdio/execute"))
        .json(&json!({ "command": "echo", "args": ["hello"], "timeout": 5 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["exit_code"], json!(0));
    assert_eq!(body["stdout"], json!("hello\n"));
    assert_eq!(body["timed_out"], json!(false));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn broadcast_reaches_open_sse_sessions() {
    let tg = test_gateway().await;
    let base = tg.serve().await;
    let client = reqwest::Client::new();

    let stream = client.get(format!("{base}/sse")).send().await.unwrap();
    let session_id = stream
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let failures = tg
        .state
        .manager
        .broadcast_message(
            TransportKind::Sse,
            gateway_core::messages::JsonRpcMessage::Notification(
                gateway_core::messages::JsonRpcNotification::new(
                    "announce",
                    json!({"hello": true}),
                ),
            ),
        )
        .await;
    assert!(failures.is_empty());

    let raw = read_sse_until(stream, Duration::from_secs(5), |s| s.contains("announce")).await;
    assert!(raw.contains("announce"), "{raw}");

    let session = tg.state.sessions.get(&session_id).await.unwrap();
    assert!(session.events_after(0).await.len() >= 2);

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn openapi_spec_lists_namespace_tools() {
    let tg = test_gateway().await;
    let backend = wiremock::MockServer::start().await;
    mount_mcp_backend(&backend, &["echo"]).await;
    let id = tg.register_http(ZERO_ORG, "A", &backend.uri()).await;
    tg.put_namespace(ZERO_ORG, "prod", &[&id]).await;
    let base = tg.serve().await;

    let spec: Value = reqwest::get(format!("{base}/mcp/prod/openapi.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(spec["openapi"], "3.0.3");
    assert!(spec["paths"].get("/tools/A__echo").is_some());

    let docs = reqwest::get(format!("{base}/mcp/prod/docs"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(docs.contains("swagger-ui"));

    tg.gateway.shutdown().await;
}
