// ABOUTME: LLM provider abstraction layer for pluggable AI model integration
// ABOUTME: Defines messages, tool declarations, streaming chunks and the LlmProvider contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # LLM Provider Service Provider Interface
//!
//! This module defines the contract that LLM providers must implement to drive
//! a chat turn. One call to [`LlmProvider::complete_stream`] is one generation
//! step: the stream yields text deltas and tool call fragments, then ends.
//! The relay decides whether another step follows.
//!
//! ## Key Concepts
//!
//! - **`LlmCapabilities`**: Bitflags describing provider features (streaming, function calling, etc.)
//! - **`LlmProvider`**: Async trait for streaming chat completion
//! - **`ChatMessage`**: Role-based message structure, including tool calls and results
//! - **`ChatRequest`**: Request configuration including model and tool declarations
//!
//! ## Example: Using a Provider
//!
//! ```rust,no_run
//! use rube_chat_server::llm::{ChatMessage, ChatRequest, LlmProvider};
//! use futures_util::StreamExt;
//!
//! async fn example(provider: &dyn LlmProvider) {
//!     let messages = vec![
//!         ChatMessage::system("You are a helpful assistant."),
//!         ChatMessage::user("Summarize my unread email"),
//!     ];
//!
//!     let request = ChatRequest::new(messages).with_streaming();
//!     if let Ok(mut stream) = provider.complete_stream(&request).await {
//!         while let Some(Ok(chunk)) = stream.next().await {
//!             print!("{}", chunk.delta);
//!         }
//!     }
//! }
//! ```

mod openai_compatible;
pub mod prompts;
pub mod sse_parser;

pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
pub use prompts::get_assistant_system_prompt;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::Stream;

use crate::errors::AppError;

// ============================================================================
// Capability Flags
// ============================================================================

bitflags::bitflags! {
    /// LLM provider capability flags using bitflags for efficient storage
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LlmCapabilities: u8 {
        /// Provider supports streaming responses
        const STREAMING = 0b0000_0001;
        /// Provider supports function/tool calling
        const FUNCTION_CALLING = 0b0000_0010;
        /// Provider supports system messages
        const SYSTEM_MESSAGES = 0b0001_0000;
    }
}

impl LlmCapabilities {
    /// Create capabilities for a basic text-only provider
    #[must_use]
    pub const fn text_only() -> Self {
        Self::STREAMING.union(Self::SYSTEM_MESSAGES)
    }

    /// Capabilities of a provider that can drive tool-augmented turns
    #[must_use]
    pub const fn tool_calling() -> Self {
        Self::STREAMING
            .union(Self::FUNCTION_CALLING)
            .union(Self::SYSTEM_MESSAGES)
    }

    /// Check if function calling is supported
    #[must_use]
    pub const fn supports_function_calling(&self) -> bool {
        self.contains(Self::FUNCTION_CALLING)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction message
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
    /// Result of a tool invocation
    Tool,
}

impl MessageRole {
    /// Convert to string representation for API calls
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call id, echoed back with the result
    pub id: String,
    /// Tool name
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// A tool the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

/// A single message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
    /// Tool calls issued by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<FunctionCall>,
    /// Call id a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a new chat message
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Assistant message carrying the tool calls of one step
    #[must_use]
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<FunctionCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::assistant(content)
        }
    }

    /// Tool result answering `call_id`
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Configuration for a chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Model identifier (provider-specific)
    pub model: Option<String>,
    /// Whether to stream the response
    pub stream: bool,
    /// Tools the model may call during this step
    pub tools: Option<Vec<FunctionDeclaration>>,
}

impl ChatRequest {
    /// Create a new chat request with messages
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            stream: false,
            tools: None,
        }
    }

    /// Set the model to use
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enable streaming
    #[must_use]
    pub const fn with_streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Declare the tools available to the model; an empty set declares none
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<FunctionDeclaration>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }
}

/// Fragment of a streamed tool call, keyed by its position in the step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the step
    pub index: u32,
    /// Call id (first fragment only)
    pub id: Option<String>,
    /// Tool name (first fragment only)
    pub name: Option<String>,
    /// Next piece of the JSON argument string
    pub arguments: String,
}

/// A chunk of a streaming response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Content delta for this chunk
    pub delta: String,
    /// Whether this is the final chunk
    pub is_final: bool,
    /// Finish reason if final
    pub finish_reason: Option<String>,
    /// Tool call fragments carried by this chunk
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

impl StreamChunk {
    /// Text-only chunk
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Self::default()
        }
    }

    /// Terminal chunk with a finish reason
    #[must_use]
    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            is_final: true,
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Whether the chunk carries anything a consumer must see
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.delta.is_empty() || self.is_final || !self.tool_calls.is_empty()
    }
}

/// Stream type for chat completion responses
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AppError>> + Send>>;

/// Reassembles streamed tool call fragments into complete calls
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, ToolCallDelta>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment
    pub fn push(&mut self, delta: ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_insert_with(|| ToolCallDelta {
            index: delta.index,
            ..ToolCallDelta::default()
        });
        if delta.id.is_some() {
            entry.id = delta.id;
        }
        if delta.name.is_some() {
            entry.name = delta.name;
        }
        entry.arguments.push_str(&delta.arguments);
    }

    /// Whether any fragment was received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Complete calls in index order
    ///
    /// # Errors
    ///
    /// Returns an error if a call has no name or its arguments are not valid JSON
    pub fn finish(self) -> Result<Vec<FunctionCall>, AppError> {
        self.calls
            .into_values()
            .map(|call| {
                let name = call.name.ok_or_else(|| {
                    AppError::external_service("llm", format!("tool call {} has no name", call.index))
                })?;
                let args = if call.arguments.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&call.arguments).map_err(|e| {
                        AppError::external_service(
                            "llm",
                            format!("invalid arguments for tool {name}: {e}"),
                        )
                    })?
                };
                Ok(FunctionCall {
                    id: call.id.unwrap_or_else(|| format!("call_{}", call.index)),
                    name,
                    args,
                })
            })
            .collect()
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// LLM provider trait for chat completion
///
/// The design follows the async trait pattern for compatibility
/// with tokio-based async runtime.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Unique provider identifier (e.g., "openai", "ollama")
    fn name(&self) -> &'static str;

    /// Provider capabilities (streaming, function calling, etc.)
    fn capabilities(&self) -> LlmCapabilities;

    /// Default model to use if not specified in request
    fn default_model(&self) -> &str;

    /// Perform one streaming generation step
    ///
    /// Errors returned here happen before any output; errors inside the
    /// stream happen after output may already have been forwarded.
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_joins_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallDelta {
            index: 0,
            id: Some("call_a".to_owned()),
            name: Some("GMAIL_FETCH_EMAILS".to_owned()),
            arguments: "{\"max_".to_owned(),
        });
        acc.push(ToolCallDelta {
            index: 0,
            arguments: "results\":5}".to_owned(),
            ..ToolCallDelta::default()
        });

        let calls = acc.finish().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "GMAIL_FETCH_EMAILS");
        assert_eq!(calls[0].args["max_results"], 5);
    }

    #[test]
    fn test_accumulator_orders_by_index_and_defaults_args() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallDelta {
            index: 1,
            id: Some("second".to_owned()),
            name: Some("b".to_owned()),
            arguments: String::new(),
        });
        acc.push(ToolCallDelta {
            index: 0,
            id: Some("first".to_owned()),
            name: Some("a".to_owned()),
            arguments: "{}".to_owned(),
        });

        let calls = acc.finish().unwrap();
        assert_eq!(calls[0].id, "first");
        assert_eq!(calls[1].id, "second");
        assert!(calls[1].args.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_accumulator_rejects_bad_json() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallDelta {
            index: 0,
            id: None,
            name: Some("a".to_owned()),
            arguments: "{not json".to_owned(),
        });
        assert!(acc.finish().is_err());
    }

    #[test]
    fn test_empty_tools_are_not_declared() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_tools(Vec::new());
        assert!(request.tools.is_none());
    }
}
