// ABOUTME: Generic OpenAI-compatible LLM provider for local and cloud endpoints
// ABOUTME: Streams chat completions with tool calling over SSE, retrying the initial request
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # `OpenAI`-Compatible Provider
//!
//! Streaming implementation for any `OpenAI`-compatible chat completions endpoint
//! (`OpenAI`, Ollama, vLLM, `LocalAI`). Tool declarations are sent as `function`
//! tools; tool call fragments in the stream are surfaced as [`ToolCallDelta`]s.
//!
//! ## Configuration
//!
//! Built from [`LlmConfig`](crate::config::LlmConfig):
//! - `LLM_BASE_URL`: Base URL (default: <https://api.openai.com/v1>)
//! - `LLM_MODEL`: Model to use (default: `gpt-4o`)
//! - `LLM_API_KEY`: API key (optional for local servers)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::sse_parser::{
    create_sse_stream, is_retryable_request_error, is_retryable_status, RetryConfig,
};
use super::{
    ChatMessage, ChatRequest, ChatStream, FunctionDeclaration, LlmCapabilities, LlmProvider,
    MessageRole, StreamChunk, ToolCallDelta,
};
use crate::config::LlmConfig;
use crate::constants::{service_names, timeouts};
use crate::errors::{AppError, ErrorCode};

// ============================================================================
// API Request/Response Types (OpenAI-compatible format)
// ============================================================================

/// OpenAI-compatible API request structure
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

/// Tool definition for OpenAI-compatible API
#[derive(Debug, Clone, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAiFunction,
}

/// Function definition within a tool
#[derive(Debug, Clone, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

/// Message structure for OpenAI-compatible API
#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Tool call echoed back in the history
#[derive(Debug, Clone, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: OpenAiFunctionCall,
}

/// Function call details
#[derive(Debug, Clone, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls: Vec<OpenAiToolCall> = msg
            .tool_calls
            .iter()
            .map(|call| OpenAiToolCall {
                id: call.id.clone(),
                call_type: "function",
                function: OpenAiFunctionCall {
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                },
            })
            .collect();

        // Assistant turns that only call tools carry a null content
        let content = if msg.role == MessageRole::Assistant
            && !tool_calls.is_empty()
            && msg.content.is_empty()
        {
            None
        } else {
            Some(msg.content.clone())
        };

        Self {
            role: msg.role.as_str(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

/// Streaming chunk structure
#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

/// Choice in streaming chunk
#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

/// Delta content in streaming chunk
#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCallDelta>,
}

/// Tool call fragment in a streaming delta
#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

/// Function fragment in a streaming delta
#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Error response structure
#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

/// Error detail structure
#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for the `OpenAI`-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Base URL for the API (e.g., <https://api.openai.com/v1>)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
    /// Default model to use
    pub default_model: String,
    /// Capabilities of this provider
    pub capabilities: LlmCapabilities,
    /// Retry policy for the initial request
    pub retry: RetryConfig,
}

impl OpenAiCompatibleConfig {
    /// Build provider configuration from the server's LLM settings
    #[must_use]
    pub fn from_llm_config(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
            capabilities: LlmCapabilities::tool_calling(),
            retry: RetryConfig::default_config(),
        }
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Generic `OpenAI`-compatible LLM provider
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts::CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(timeouts::LLM_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        info!(
            "Initializing OpenAI-compatible provider: base_url={}, model={}",
            config.base_url, config.default_model
        );

        Ok(Self { client, config })
    }

    /// Create a provider from the server's LLM settings
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: &LlmConfig) -> Result<Self, AppError> {
        Self::new(OpenAiCompatibleConfig::from_llm_config(config))
    }

    /// Build the API URL for a given endpoint
    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint
        )
    }

    /// Convert internal tool declarations to `OpenAI` format
    fn convert_tools(tools: &[FunctionDeclaration]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|func| OpenAiTool {
                tool_type: "function",
                function: OpenAiFunction {
                    name: func.name.clone(),
                    description: func.description.clone(),
                    parameters: func.parameters.clone(),
                },
            })
            .collect()
    }

    /// Parse one SSE payload into a stream chunk
    fn parse_stream_data(json_str: &str) -> Option<Result<StreamChunk, AppError>> {
        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(json_str) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Failed to parse stream chunk: {e}");
                return None;
            }
        };

        // Usage-only chunks carry no choices
        let choice = chunk.choices.into_iter().next()?;
        let tool_calls = choice
            .delta
            .tool_calls
            .into_iter()
            .map(|call| {
                let (name, arguments) = call
                    .function
                    .map_or((None, None), |f| (f.name, f.arguments));
                ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments: arguments.unwrap_or_default(),
                }
            })
            .collect();

        Some(Ok(StreamChunk {
            delta: choice.delta.content.unwrap_or_default(),
            is_final: choice.finish_reason.is_some(),
            finish_reason: choice.finish_reason,
            tool_calls,
        }))
    }

    /// Parse error response from API
    fn parse_error_response(status: reqwest::StatusCode, body: &str) -> AppError {
        let service = service_names::LLM_PROVIDER;
        if let Ok(error_response) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            let error_type = error_response
                .error
                .error_type
                .unwrap_or_else(|| "unknown".to_owned());

            match status.as_u16() {
                429 => AppError::new(
                    ErrorCode::ExternalRateLimited,
                    Self::extract_rate_limit_message(&error_response.error.message),
                ),
                _ => AppError::external_service(
                    service,
                    format!("{status} {error_type} - {}", error_response.error.message),
                ),
            }
        } else {
            AppError::external_service(
                service,
                format!(
                    "API error ({}): {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            )
        }
    }

    /// Extract a rate limit message, keeping the retry-after hint when present
    fn extract_rate_limit_message(message: &str) -> String {
        let lower = message.to_lowercase();
        if let Some(retry_pos) = lower.find("try again in ") {
            let after_prefix = &lower[retry_pos + 13..];
            let end_pos = after_prefix
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .unwrap_or(after_prefix.len());
            if let Ok(seconds) = after_prefix[..end_pos].parse::<f64>() {
                let seconds_int = seconds.ceil() as u64;
                return format!("LLM rate limit reached. Please try again in {seconds_int} seconds.");
            }
        }
        "LLM rate limit reached. Please wait a moment and try again.".to_owned()
    }

    /// Add authorization header if API key is configured
    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("Bearer {api_key}"))
        } else {
            request
        }
    }

    /// Send the request, retrying transient failures before any byte is read
    async fn send_with_retry(&self, body: &OpenAiRequest) -> Result<reqwest::Response, AppError> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            let http_request = self
                .client
                .post(self.api_url("chat/completions"))
                .header("Content-Type", "application/json")
                .json(body);

            match self.add_auth_header(http_request).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if is_retryable_status(response.status().as_u16())
                        && attempt < retry.max_retries =>
                {
                    warn!(
                        status = response.status().as_u16(),
                        attempt, "Retryable status from LLM endpoint"
                    );
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(Self::parse_error_response(status, &text));
                }
                Err(e) if is_retryable_request_error(&e) && attempt < retry.max_retries => {
                    warn!(attempt, "Retryable request error from LLM endpoint: {e}");
                }
                Err(e) => {
                    error!("Failed to send streaming request: {e}");
                    return Err(AppError::external_service(
                        service_names::LLM_PROVIDER,
                        format!("Failed to connect to {}: {e}", self.config.base_url),
                    ));
                }
            }

            sleep(retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    fn capabilities(&self) -> LlmCapabilities {
        self.config.capabilities
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let model = request
            .model
            .as_deref()
            .unwrap_or(&self.config.default_model);

        let tools = request.tools.as_deref().map(Self::convert_tools);
        debug!(
            messages = request.messages.len(),
            tools = tools.as_ref().map_or(0, Vec::len),
            "Sending streaming chat completion request"
        );

        let openai_request = OpenAiRequest {
            model: model.to_owned(),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            stream: true,
            tool_choice: tools.as_ref().map(|_| "auto".to_owned()),
            tools,
        };

        let response = self.send_with_retry(&openai_request).await?;

        Ok(create_sse_stream(
            response.bytes_stream(),
            Self::parse_stream_data,
            service_names::LLM_PROVIDER,
        ))
    }
}
