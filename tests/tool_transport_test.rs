// ABOUTME: Tests for the tool router client and MCP HTTP transport against a local mock server
// ABOUTME: Covers session creation, the initialize handshake, JSON and SSE replies, and session close
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use common::init_test_logging;
use rube_chat_server::{
    cache::ToolSessionKey,
    config::ToolRouterConfig,
    errors::ErrorCode,
    tools::{
        HttpToolRouter, McpHttpTransport, ToolRouter, ToolRouterSession, ToolSessionFactory,
        ToolTransport,
    },
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const MCP_SESSION: &str = "mcp-abc";
const API_KEY: &str = "router-key";

/// One request seen by the mock server
#[derive(Debug, Clone)]
struct Seen {
    verb: &'static str,
    method: Option<String>,
    mcp_session: Option<String>,
    api_key: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    seen: Arc<Mutex<Vec<Seen>>>,
    base_url: Arc<Mutex<String>>,
    fail_session: Arc<Mutex<bool>>,
    unreachable_mcp: Arc<Mutex<bool>>,
}

impl MockState {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, verb: &'static str, headers: &HeaderMap, body: Value) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        self.seen.lock().unwrap().push(Seen {
            verb,
            method: body.get("method").and_then(Value::as_str).map(str::to_owned),
            mcp_session: header("mcp-session-id"),
            api_key: header("x-api-key"),
            body,
        });
    }
}

async fn create_session(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", &headers, body);
    if *state.fail_session.lock().unwrap() {
        return (StatusCode::SERVICE_UNAVAILABLE, "router down").into_response();
    }
    let base_url = state.base_url.lock().unwrap().clone();
    let path = if *state.unreachable_mcp.lock().unwrap() {
        "missing"
    } else {
        "mcp"
    };
    Json(json!({
        "session_id": "router-session-1",
        "mcp_url": format!("{base_url}/{path}")
    }))
    .into_response()
}

async fn mcp_post(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", &headers, body.clone());
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body.get("method").and_then(Value::as_str).unwrap_or_default();

    match method {
        "initialize" => (
            [("mcp-session-id", MCP_SESSION)],
            Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": "mock-tools", "version": "1.0"}
                }
            })),
        )
            .into_response(),
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => {
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [
                        {
                            "name": "GMAIL_FETCH_EMAILS",
                            "description": "Fetch recent emails",
                            "inputSchema": {"type": "object", "properties": {"max_results": {"type": "integer"}}}
                        },
                        {"name": "GMAIL_SEND_EMAIL"}
                    ]
                }
            });
            let sse = format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {reply}\n\n",
                json!({"jsonrpc": "2.0", "method": "notifications/progress"})
            );
            ([("content-type", "text/event-stream")], sse).into_response()
        }
        "tools/call" => {
            let name = body["params"]["name"].as_str().unwrap_or_default();
            if name == "GMAIL_FETCH_EMAILS" {
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [
                            {"type": "text", "text": "3 unread emails"},
                            {"type": "text", "text": format!("args {}", body["params"]["arguments"])}
                        ]
                    }
                }))
                .into_response()
            } else {
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32602, "message": format!("Unknown tool: {name}")}
                }))
                .into_response()
            }
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn mcp_delete(State(state): State<MockState>, headers: HeaderMap) -> StatusCode {
    state.record("DELETE", &headers, Value::Null);
    StatusCode::OK
}

async fn start_mock_server() -> (String, MockState) {
    init_test_logging();
    let state = MockState::default();
    let app = Router::new()
        .route("/session", post(create_session))
        .route("/mcp", post(mcp_post).delete(mcp_delete))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    *state.base_url.lock().unwrap() = base_url.clone();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, state)
}

fn router_for(base_url: &str) -> HttpToolRouter {
    HttpToolRouter::from_config(&ToolRouterConfig {
        base_url: Some(format!("{base_url}/")),
        api_key: Some(API_KEY.to_owned()),
        toolkits: vec!["gmail".to_owned()],
    })
    .unwrap()
}

// ============================================================================
// Tool router
// ============================================================================

#[tokio::test]
async fn test_router_creates_session_for_user_email() {
    let (base_url, state) = start_mock_server().await;
    let router = router_for(&base_url);

    let session = router
        .create_session("user@example.com", &["gmail".to_owned()])
        .await
        .unwrap();

    assert_eq!(session.session_id, "router-session-1");
    assert_eq!(session.url, format!("{base_url}/mcp"));

    let seen = state.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].api_key.as_deref(), Some(API_KEY));
    assert_eq!(seen[0].body["user_id"], "user@example.com");
    assert_eq!(seen[0].body["toolkits"], json!(["gmail"]));
}

#[tokio::test]
async fn test_router_failure_is_tool_session_error() {
    let (base_url, state) = start_mock_server().await;
    *state.fail_session.lock().unwrap() = true;

    let err = router_for(&base_url)
        .create_session("user@example.com", &[])
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::ToolSessionError);
    assert!(err.message.contains("503"));
}

#[test]
fn test_router_requires_base_url() {
    let result = HttpToolRouter::from_config(&ToolRouterConfig {
        base_url: None,
        api_key: None,
        toolkits: Vec::new(),
    });
    assert_eq!(result.err().unwrap().code, ErrorCode::ConfigError);
}

// ============================================================================
// MCP transport
// ============================================================================

#[tokio::test]
async fn test_connect_performs_handshake_and_echoes_session_header() {
    let (base_url, state) = start_mock_server().await;
    let transport = McpHttpTransport::new(Some(API_KEY.to_owned())).unwrap();

    let connection = transport
        .connect(&ToolRouterSession {
            url: format!("{base_url}/mcp"),
            session_id: "router-session-1".to_owned(),
        })
        .await
        .unwrap();

    let tools = connection.list_tools().await.unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].name, "GMAIL_FETCH_EMAILS");
    assert_eq!(tools[0].input_schema["properties"]["max_results"]["type"], "integer");
    assert_eq!(tools[1].description, "");
    assert_eq!(tools[1].input_schema["type"], "object");

    let seen = state.seen();
    let methods: Vec<Option<&str>> = seen.iter().map(|s| s.method.as_deref()).collect();
    assert_eq!(
        methods,
        vec![
            Some("initialize"),
            Some("notifications/initialized"),
            Some("tools/list")
        ]
    );
    assert!(seen[0].mcp_session.is_none());
    assert_eq!(seen[1].mcp_session.as_deref(), Some(MCP_SESSION));
    assert_eq!(seen[2].mcp_session.as_deref(), Some(MCP_SESSION));
    assert!(seen.iter().all(|s| s.api_key.as_deref() == Some(API_KEY)));
    assert!(seen[1].body.get("id").is_none());
}

#[tokio::test]
async fn test_call_tool_and_close() {
    let (base_url, state) = start_mock_server().await;
    let transport = McpHttpTransport::new(None).unwrap();
    let connection = transport
        .connect(&ToolRouterSession {
            url: format!("{base_url}/mcp"),
            session_id: "router-session-1".to_owned(),
        })
        .await
        .unwrap();

    let output = connection
        .call_tool("GMAIL_FETCH_EMAILS", json!({"max_results": 3}))
        .await
        .unwrap();
    assert!(!output.is_error);
    assert_eq!(output.content, "3 unread emails\nargs {\"max_results\":3}");

    let err = connection
        .call_tool("GMAIL_DELETE_EVERYTHING", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ToolSessionError);
    assert!(err.message.contains("Unknown tool"));

    connection.close().await.unwrap();
    let last = state.seen().pop().unwrap();
    assert_eq!(last.verb, "DELETE");
    assert_eq!(last.mcp_session.as_deref(), Some(MCP_SESSION));
}

#[tokio::test]
async fn test_connect_to_missing_endpoint_fails() {
    let (base_url, _state) = start_mock_server().await;
    let transport = McpHttpTransport::new(None).unwrap();

    let result = transport
        .connect(&ToolRouterSession {
            url: format!("{base_url}/missing"),
            session_id: "router-session-1".to_owned(),
        })
        .await;

    assert_eq!(result.err().unwrap().code, ErrorCode::ToolSessionError);
}

#[tokio::test]
async fn test_factory_establishes_session_end_to_end() {
    let (base_url, state) = start_mock_server().await;
    let factory = ToolSessionFactory::new(
        Arc::new(router_for(&base_url)),
        Arc::new(McpHttpTransport::new(Some(API_KEY.to_owned())).unwrap()),
        vec!["gmail".to_owned()],
    );
    let key = ToolSessionKey::new("user-1", "conv-1");

    let session = factory.establish(key.clone(), "user@example.com").await.unwrap();
    assert_eq!(session.key(), &key);
    assert_eq!(session.descriptor().session_id, "router-session-1");

    let declarations = session.function_declarations();
    assert_eq!(declarations.len(), 2);
    assert_eq!(declarations[0].name, "GMAIL_FETCH_EMAILS");

    session.close().await;
    assert!(session.is_closed());
    assert!(state
        .seen()
        .iter()
        .any(|s| s.verb == "DELETE" && s.mcp_session.as_deref() == Some(MCP_SESSION)));
}

#[tokio::test]
async fn test_factory_connect_failure_is_tool_session_error() {
    let (base_url, state) = start_mock_server().await;
    *state.unreachable_mcp.lock().unwrap() = true;
    let factory = ToolSessionFactory::new(
        Arc::new(router_for(&base_url)),
        Arc::new(McpHttpTransport::new(Some(API_KEY.to_owned())).unwrap()),
        vec!["gmail".to_owned()],
    );

    let result = factory
        .establish(ToolSessionKey::new("user-1", "conv-1"), "user@example.com")
        .await;

    assert_eq!(result.err().unwrap().code, ErrorCode::ToolSessionError);
    let seen = state.seen();
    assert_eq!(seen[0].body["user_id"], "user@example.com");
    assert!(seen.iter().all(|s| s.verb == "POST"));
}
