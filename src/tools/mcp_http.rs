// ABOUTME: MCP client over streamable HTTP for tool-routing session endpoints
// ABOUTME: Performs the initialize handshake, lists and calls tools, accepts JSON or SSE replies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # MCP HTTP Transport
//!
//! Every JSON-RPC message is `POST`ed to the session URL. The server may reply
//! with `application/json` or with a `text/event-stream` body carrying the
//! response as a `data:` event. A session id returned in the `mcp-session-id`
//! header during `initialize` is echoed on every later request and used to
//! `DELETE` the session on close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use super::{ToolCallOutput, ToolConnection, ToolDefinition, ToolRouterSession, ToolTransport};
use crate::constants::{headers, mcp, service_names, timeouts};
use crate::errors::{AppError, AppResult};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::llm::sse_parser::{SseEvent, SseLineBuffer};

const ACCEPT_JSON_OR_SSE: &str = "application/json, text/event-stream";

/// Opens [`McpHttpConnection`]s
#[derive(Clone)]
pub struct McpHttpTransport {
    client: Client,
    api_key: Option<String>,
}

impl McpHttpTransport {
    /// Create a transport; `api_key` is sent as `x-api-key` on every request
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: Option<String>) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts::CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(timeouts::SERVICE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl ToolTransport for McpHttpTransport {
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn connect(&self, session: &ToolRouterSession) -> AppResult<Arc<dyn ToolConnection>> {
        let connection = McpHttpConnection {
            client: self.client.clone(),
            url: session.url.clone(),
            api_key: self.api_key.clone(),
            mcp_session_id: OnceCell::new(),
            next_id: AtomicU64::new(1),
        };
        connection.initialize().await?;
        Ok(Arc::new(connection))
    }
}

/// JSON-RPC client bound to one session endpoint
pub struct McpHttpConnection {
    client: Client,
    url: String,
    api_key: Option<String>,
    mcp_session_id: OnceCell<String>,
    next_id: AtomicU64,
}

impl McpHttpConnection {
    async fn initialize(&self) -> AppResult<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": mcp::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": service_names::RUBE_CHAT_SERVER,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;

        debug!(
            server = ?result.get("serverInfo"),
            "MCP session initialized"
        );

        self.notify("notifications/initialized").await
    }

    fn with_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(id) = self.mcp_session_id.get() {
            request = request.header(headers::MCP_SESSION_ID, id);
        }
        if let Some(api_key) = &self.api_key {
            request = request.header(headers::TOOL_ROUTER_API_KEY, api_key);
        }
        request
    }

    async fn post(&self, message: &JsonRpcRequest) -> AppResult<reqwest::Response> {
        let request = self
            .client
            .post(&self.url)
            .header(ACCEPT, ACCEPT_JSON_OR_SSE)
            .json(message);

        let response = self
            .with_headers(request)
            .send()
            .await
            .map_err(|e| AppError::tool_session(format!("MCP {} failed: {e}", message.method)))?;

        if let Some(id) = response
            .headers()
            .get(headers::MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            // Only the first id is kept; later echoes are identical
            let _ = self.mcp_session_id.set(id.to_owned());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::tool_session(format!(
                "MCP {} returned {status}: {}",
                message.method,
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(response)
    }

    async fn notify(&self, method: &str) -> AppResult<()> {
        self.post(&JsonRpcRequest::notification(method, None))
            .await
            .map(drop)
    }

    async fn request(&self, method: &str, params: Value) -> AppResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = JsonRpcRequest::with_id(method, Some(params), json!(id));
        let response = self.post(&message).await?;

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::tool_session(format!("MCP {method} body read failed: {e}")))?;

        let reply = if is_sse {
            Self::response_from_sse(&body, id)
        } else {
            serde_json::from_slice::<JsonRpcResponse>(&body).ok()
        }
        .ok_or_else(|| AppError::tool_session(format!("MCP {method} returned no response")))?;

        if let Some(error) = reply.error {
            return Err(AppError::tool_session(format!(
                "MCP {method} error {}: {}",
                error.code, error.message
            )));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// Pick the response matching `id` out of an SSE body
    fn response_from_sse(body: &[u8], id: u64) -> Option<JsonRpcResponse> {
        let mut parser = SseLineBuffer::new();
        let mut events = parser.feed(body);
        events.extend(parser.flush());

        events.into_iter().find_map(|event| match event {
            SseEvent::Data(data) => serde_json::from_str::<JsonRpcResponse>(&data)
                .ok()
                .filter(|r| r.id.as_ref().and_then(Value::as_u64) == Some(id)),
            SseEvent::Done => None,
        })
    }

    /// Join the text blocks of a `tools/call` result
    fn call_output(result: &Value) -> ToolCallOutput {
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let content = result.get("content").and_then(Value::as_array).map_or_else(
            || result.to_string(),
            |blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            },
        );

        ToolCallOutput { content, is_error }
    }
}

#[async_trait]
impl ToolConnection for McpHttpConnection {
    async fn list_tools(&self) -> AppResult<Vec<ToolDefinition>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        serde_json::from_value(tools)
            .map_err(|e| AppError::tool_session(format!("Invalid tools/list result: {e}")))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> AppResult<ToolCallOutput> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(Self::call_output(&result))
    }

    async fn close(&self) -> AppResult<()> {
        let Some(id) = self.mcp_session_id.get() else {
            return Ok(());
        };

        let request = self.client.delete(&self.url);
        let response = self
            .with_headers(request)
            .send()
            .await
            .map_err(|e| AppError::tool_session(format!("MCP session close failed: {e}")))?;

        // Servers without explicit session termination answer 405
        let status = response.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            debug!(mcp_session_id = %id, "MCP session closed");
            Ok(())
        } else {
            warn!(mcp_session_id = %id, %status, "MCP session close rejected");
            Err(AppError::tool_session(format!(
                "MCP session close returned {status}"
            )))
        }
    }
}
