//! OpenAPI description of a namespace's aggregated tool surface.
//!
//! Every active tool in the namespace becomes a POST operation, so REST
//! clients and the bundled Swagger UI can browse and invoke the
//! aggregated surface without speaking JSON-RPC themselves.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Json, Response};
use serde_json::json;

use super::{auth_context, error_reply, SharedState};

/// `GET /mcp/{endpoint}/openapi.json`
pub async fn handle_spec(
    State(state): State<SharedState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
) -> Response {
    let auth = auth_context(&state, &headers, None, Some(endpoint.clone()));

    let tools = match state
        .aggregator
        .list_tools(&auth.organization_id, &endpoint)
        .await
    {
        Ok(result) => result.tools,
        Err(e) => return error_reply(&e),
    };

    let mut paths = serde_json::Map::new();
    for tool in &tools {
        let schema = tool
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "object" }));
        paths.insert(
            format!("/tools/{}", tool.name),
            json!({
                "post": {
                    "operationId": tool.name,
                    "summary": tool.description,
                    "requestBody": {
                        "content": { "application/json": { "schema": schema } }
                    },
                    "responses": {
                        "200": { "description": "Tool result" }
                    }
                }
            }),
        );
    }

    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": format!("{} namespace '{}'", state.config.gateway_name, endpoint),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": paths,
    }))
    .into_response()
}

/// `GET /mcp/{endpoint}/docs`: Swagger UI over the spec above.
pub async fn handle_docs(Path(endpoint): Path<String>) -> Response {
    let spec_url = format!("/mcp/{endpoint}/openapi.json");
    Html(format!(
        r##"<!DOCTYPE html>
<html>
<head>
  <title>MCP namespace: {endpoint}</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    SwaggerUIBundle({{ url: "{spec_url}", dom_id: "#swagger-ui" }});
  </script>
</body>
</html>"##
    ))
    .into_response()
}
