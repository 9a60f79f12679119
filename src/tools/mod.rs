// ABOUTME: Tool-routing collaborator contracts and shared tool types
// ABOUTME: Defines ToolRouter, ToolTransport and ToolConnection plus the per-conversation ToolSession
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Tool Routing
//!
//! A hosted tool-routing service hands out per-user sessions through which the
//! assistant invokes third-party actions. Establishing a usable session takes
//! three remote steps:
//!
//! 1. [`ToolRouter::create_session`] allocates a session for the user's email
//!    and returns its endpoint;
//! 2. [`ToolTransport::connect`] opens a [`ToolConnection`] to that endpoint;
//! 3. [`ToolConnection::list_tools`] resolves the tool set.
//!
//! [`ToolSessionFactory`] runs these steps and produces a [`ToolSession`], the
//! value held by the session cache.

/// MCP JSON-RPC over HTTP transport
pub mod mcp_http;
/// REST client for the tool-routing session endpoint
pub mod router;
/// Established sessions and the factory that builds them
pub mod session;

pub use mcp_http::{McpHttpConnection, McpHttpTransport};
pub use router::HttpToolRouter;
pub use session::{ToolSession, ToolSessionFactory};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppResult;
use crate::llm::FunctionDeclaration;

/// A tool exposed by a tool-routing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, e.g. `GMAIL_FETCH_EMAILS`
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    /// Declaration handed to the model
    #[must_use]
    pub fn to_function_declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// Remote session descriptor returned by the tool router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRouterSession {
    /// Endpoint of the session's tool server
    pub url: String,
    /// Router-assigned session id
    pub session_id: String,
}

/// Result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    /// Text content returned to the model
    pub content: String,
    /// Whether the tool reported a failure
    pub is_error: bool,
}

/// Allocates tool-routing sessions
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Create a session for `user_email` with the given toolkits enabled
    async fn create_session(
        &self,
        user_email: &str,
        toolkits: &[String],
    ) -> AppResult<ToolRouterSession>;
}

/// Opens connections to session endpoints
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Connect to the session's tool server and complete any handshake
    async fn connect(&self, session: &ToolRouterSession) -> AppResult<Arc<dyn ToolConnection>>;
}

/// An open connection to a session's tool server
#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// Resolve the callable tools
    async fn list_tools(&self) -> AppResult<Vec<ToolDefinition>>;

    /// Invoke one tool
    async fn call_tool(&self, name: &str, arguments: Value) -> AppResult<ToolCallOutput>;

    /// Release the remote session; called at most once per connection
    async fn close(&self) -> AppResult<()>;
}
