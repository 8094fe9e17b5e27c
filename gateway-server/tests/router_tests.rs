//! Integration tests for the JSON-RPC router: validation, batches,
//! namespace aggregation, forwarding, and cancellation.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};

use gateway_server::config::ZERO_ORG;
use gateway_server::model::MappingStatus;
use gateway_server::repository::NamespaceRepository;
use gateway_server::router::{RequestScope, RpcOutcome};

use common::{mount_mcp_backend, test_gateway};

fn gateway_scope() -> RequestScope {
    RequestScope::new(gateway_server::model::AuthContext::gateway(
        "tester", ZERO_ORG,
    ))
}

fn server_scope(server_id: &str) -> RequestScope {
    RequestScope::new(gateway_server::model::AuthContext::for_server(
        "tester", ZERO_ORG, server_id,
    ))
}

fn single(outcome: RpcOutcome) -> Value {
    match outcome {
        RpcOutcome::Single(response) => serde_json::to_value(response).unwrap(),
        other => panic!("expected single response, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_echoes_protocol_and_names_the_gateway() {
    let tg = test_gateway().await;

    let body = json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": { "protocolVersion": "2024-11-05" }
    });
    let response = single(
        tg.state
            .router
            .dispatch(&gateway_scope(), body.to_string().as_bytes())
            .await,
    );

    assert_eq!(response["id"], json!(1));
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(response["result"]["serverInfo"]["name"], "mcp-gateway");
    assert!(response.get("error").is_none());

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn every_response_carries_the_request_id_and_one_outcome() {
    let tg = test_gateway().await;
    let scope = gateway_scope();

    for (id, method) in [(json!(7), "ping"), (json!("abc"), "no/such/method")] {
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        let response = single(
            tg.state
                .router
                .dispatch(&scope, body.to_string().as_bytes())
                .await,
        );
        assert_eq!(response["id"], id);
        let has_result = response.get("result").is_some();
        let has_error = response.get("error").is_some();
        assert!(has_result ^ has_error, "exactly one of result/error");
    }

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn malformed_json_is_parse_error() {
    let tg = test_gateway().await;
    let response = single(
        tg.state
            .router
            .dispatch(&gateway_scope(), b"{oops")
            .await,
    );
    assert_eq!(response["error"]["code"], json!(-32700));
    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn wrong_version_and_missing_method_are_invalid_requests() {
    let tg = test_gateway().await;
    let scope = gateway_scope();

    for body in [
        json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }),
        json!({ "jsonrpc": "2.0", "id": 2 }),
        json!({ "jsonrpc": "2.0", "id": 3, "method": "" }),
    ] {
        let response = single(
            tg.state
                .router
                .dispatch(&scope, body.to_string().as_bytes())
                .await,
        );
        assert_eq!(response["error"]["code"], json!(-32600));
    }

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn scalar_params_are_invalid_params_not_invalid_request() {
    let tg = test_gateway().await;

    let body = json!({ "jsonrpc": "2.0", "id": 4, "method": "ping", "params": 5 });
    let response = single(
        tg.state
            .router
            .dispatch(&gateway_scope(), body.to_string().as_bytes())
            .await,
    );
    assert_eq!(response["id"], json!(4));
    assert_eq!(response["error"]["code"], json!(-32602));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let tg = test_gateway().await;
    let response = single(tg.state.router.dispatch(&gateway_scope(), b"[]").await);
    assert_eq!(response["error"]["code"], json!(-32600));
    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn batch_preserves_order_and_omits_notifications() {
    let tg = test_gateway().await;

    let body = json!([
        { "jsonrpc": "2.0", "id": 1, "method": "ping" },
        { "jsonrpc": "2.0", "method": "notifications/initialized" },
        { "jsonrpc": "2.0", "id": 2, "method": "ping" },
        { "jsonrpc": "2.0", "id": 3, "method": "unknown" },
    ]);
    let outcome = tg
        .state
        .router
        .dispatch(&gateway_scope(), body.to_string().as_bytes())
        .await;

    let responses = match outcome {
        RpcOutcome::Batch(responses) => responses,
        other => panic!("expected batch, got {other:?}"),
    };
    assert_eq!(responses.len(), 3);
    let ids: Vec<String> = responses.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert!(responses[2].is_error());

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn all_notification_batch_yields_empty_outcome() {
    let tg = test_gateway().await;
    let body = json!([
        { "jsonrpc": "2.0", "method": "notifications/initialized" },
        { "jsonrpc": "2.0", "method": "notifications/progress" },
    ]);
    let outcome = tg
        .state
        .router
        .dispatch(&gateway_scope(), body.to_string().as_bytes())
        .await;
    assert!(matches!(outcome, RpcOutcome::Empty));
    assert_eq!(outcome.http_status(), 204);
    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn tools_list_aggregates_and_prefixes_two_backends() {
    let tg = test_gateway().await;

    let backend_a = wiremock::MockServer::start().await;
    let backend_b = wiremock::MockServer::start().await;
    mount_mcp_backend(&backend_a, &["echo", "add"]).await;
    mount_mcp_backend(&backend_b, &["list_files"]).await;

    let id_a = tg.register_http(ZERO_ORG, "A", &backend_a.uri()).await;
    let id_b = tg.register_http(ZERO_ORG, "B", &backend_b.uri()).await;
    tg.put_namespace(ZERO_ORG, "default", &[&id_a, &id_b]).await;

    let body = json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/list" });
    let response = single(
        tg.state
            .router
            .dispatch(&gateway_scope(), body.to_string().as_bytes())
            .await,
    );

    let names: HashSet<String> = response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        HashSet::from([
            "A__echo".to_string(),
            "A__add".to_string(),
            "B__list_files".to_string(),
        ])
    );

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn tool_call_routes_to_owner_with_raw_name() {
    let tg = test_gateway().await;

    let backend = wiremock::MockServer::start().await;
    mount_mcp_backend(&backend, &["echo"]).await;
    let id = tg.register_http(ZERO_ORG, "A", &backend.uri()).await;
    tg.put_namespace(ZERO_ORG, "default", &[&id]).await;

    let body = json!({
        "jsonrpc": "2.0", "id": 9, "method": "tools/call",
        "params": { "name": "A__echo", "arguments": { "message": "hi" } }
    });
    let response = single(
        tg.state
            .router
            .dispatch(&gateway_scope(), body.to_string().as_bytes())
            .await,
    );

    // The backend saw the raw name and untouched arguments; the response
    // came back verbatim with the caller's id.
    assert_eq!(response["id"], json!(9));
    assert_eq!(response["result"]["called"], "echo");
    assert_eq!(response["result"]["arguments"]["message"], "hi");

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn inactive_tools_and_unknown_prefixes_are_method_not_found() {
    let tg = test_gateway().await;

    let backend = wiremock::MockServer::start().await;
    mount_mcp_backend(&backend, &["echo", "hidden"]).await;
    let id = tg.register_http(ZERO_ORG, "A", &backend.uri()).await;
    let ns_id = tg.put_namespace(ZERO_ORG, "default", &[&id]).await;
    tg.namespaces
        .set_tool_status(&ns_id, &id, "hidden", MappingStatus::Inactive)
        .await
        .unwrap();

    // The disabled tool disappears from the listing.
    let list = single(
        tg.state
            .router
            .dispatch(
                &gateway_scope(),
                json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })
                    .to_string()
                    .as_bytes(),
            )
            .await,
    );
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["A__echo"]);

    // Calling it, or an unknown prefix, is method-not-found.
    for name in ["A__hidden", "Z__echo", "unprefixed"] {
        let response = single(
            tg.state
                .router
                .dispatch(
                    &gateway_scope(),
                    json!({
                        "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                        "params": { "name": name }
                    })
                    .to_string()
                    .as_bytes(),
                )
                .await,
        );
        assert_eq!(response["error"]["code"], json!(-32601), "tool {name}");
    }

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn bound_server_requests_forward_verbatim() {
    let tg = test_gateway().await;

    let backend = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 42, "result": { "from": "backend" }
        })))
        .mount(&backend)
        .await;
    let id = tg.register_http(ZERO_ORG, "bound", &backend.uri()).await;

    let body = json!({ "jsonrpc": "2.0", "id": 42, "method": "resources/list" });
    let response = single(
        tg.state
            .router
            .dispatch(&server_scope(&id), body.to_string().as_bytes())
            .await,
    );
    assert_eq!(response["id"], json!(42));
    assert_eq!(response["result"]["from"], "backend");

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn forwarding_to_an_unhealthy_server_is_refused() {
    let tg = test_gateway().await;
    let backend = wiremock::MockServer::start().await;
    let id = tg.register_http(ZERO_ORG, "sick", &backend.uri()).await;
    tg.state
        .discovery
        .set_status(&id, gateway_server::model::ServerStatus::Unhealthy)
        .await
        .unwrap();

    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping2" });
    let response = single(
        tg.state
            .router
            .dispatch(&server_scope(&id), body.to_string().as_bytes())
            .await,
    );
    assert_eq!(response["error"]["code"], json!(-32000));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn cancellation_yields_minus_32002() {
    let tg = test_gateway().await;

    // A stdio backend that never answers: the forward parks on the
    // response channel until cancellation fires.
    let id = tg
        .register_stdio(ZERO_ORG, "silent", "cat", vec![])
        .await;

    let scope = server_scope(&id);
    let cancel = scope.cancel.clone();
    let router = tg.state.router.clone();
    let body = json!({ "jsonrpc": "2.0", "id": 11, "method": "tools/call",
        "params": { "name": "x" } })
    .to_string();

    let dispatch = tokio::spawn(async move { router.dispatch(&scope, body.as_bytes()).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), dispatch)
        .await
        .expect("cancellation must unblock the dispatch")
        .unwrap();
    assert_eq!(outcome.http_status(), 499);
    let response = single(outcome);
    assert_eq!(response["error"]["code"], json!(-32002));

    tg.gateway.shutdown().await;
}

#[tokio::test]
async fn stats_are_updated_on_forwarded_calls() {
    let tg = test_gateway().await;
    let backend = wiremock::MockServer::start().await;
    mount_mcp_backend(&backend, &["echo"]).await;
    let id = tg.register_http(ZERO_ORG, "A", &backend.uri()).await;
    tg.put_namespace(ZERO_ORG, "default", &[&id]).await;

    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
    let _ = tg
        .state
        .router
        .dispatch(&gateway_scope(), body.to_string().as_bytes())
        .await;

    let stats = tg.state.discovery.stats_for(&id).await;
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.success_requests, 1);
    assert!(stats.avg_latency_ms >= 0.0);

    tg.gateway.shutdown().await;
}
