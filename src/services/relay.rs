// ABOUTME: Streaming relay between the model and the HTTP response body
// ABOUTME: Runs up to max_steps generation steps, executes tool calls and persists the final reply
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Stream Relay
//!
//! One chat turn is a sequence of generation steps. Text deltas of every step
//! are forwarded to the caller as they arrive and accumulated; a step that
//! ends with tool calls has them executed through the turn's tool session and
//! their results appended to the working history before the next step.
//! At most `max_steps` steps run. When the turn completes the accumulated
//! text is persisted as the assistant message. Providers without function
//! calling get no tool set and answer in a single text step.
//!
//! Failures before the first forwarded fragment are returned from
//! [`StreamRelay::start`] so the caller can answer with a JSON error. Later
//! failures end the byte stream with an error and persist nothing.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::json;
use tracing::{error, info, warn, Span};

use super::{ConversationService, RelayStage};
use crate::config::LlmConfig;
use crate::errors::{AppError, AppResult};
use crate::llm::{
    get_assistant_system_prompt, ChatMessage, ChatRequest, FunctionCall, LlmProvider,
    MessageRole, ToolCallAccumulator,
};
use crate::logging::AppLogger;
use crate::tools::ToolSession;

/// Bytes of the assistant reply, in generation order
pub type RelayStream = Pin<Box<dyn Stream<Item = Result<Bytes, AppError>> + Send>>;

/// Inputs of one chat turn
#[derive(Debug, Clone)]
pub struct RelayTurn {
    /// Conversation the reply is appended to
    pub conversation_id: String,
    /// Authenticated user
    pub user_id: String,
    /// Conversation messages as sent by the client
    pub messages: Vec<ChatMessage>,
}

/// Relays model output for chat turns
#[derive(Clone)]
pub struct StreamRelay {
    llm: Arc<dyn LlmProvider>,
    conversations: ConversationService,
    model: String,
    max_steps: u32,
    system_prompt: String,
}

impl StreamRelay {
    /// Create a relay
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        conversations: ConversationService,
        model: impl Into<String>,
        max_steps: u32,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            conversations,
            model: model.into(),
            max_steps: max_steps.max(1),
            system_prompt: system_prompt.into(),
        }
    }

    /// Create a relay from the LLM settings; the bundled prompt is used unless overridden
    #[must_use]
    pub fn from_config(
        llm: Arc<dyn LlmProvider>,
        conversations: ConversationService,
        config: &LlmConfig,
    ) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| get_assistant_system_prompt().to_owned());
        Self::new(llm, conversations, &config.model, config.max_steps, system_prompt)
    }

    /// Start the turn and wait for its first fragment
    ///
    /// `span` receives the turn's stage transitions.
    ///
    /// # Errors
    ///
    /// Returns the upstream error if the turn fails before producing output.
    pub async fn start(
        &self,
        turn: RelayTurn,
        session: Arc<ToolSession>,
        span: Span,
    ) -> AppResult<RelayStream> {
        let mut relay = self.relay(turn, session, span);
        match relay.next().await {
            Some(Err(e)) => Err(e),
            Some(Ok(first)) => Ok(Box::pin(stream::once(async move { Ok(first) }).chain(relay))),
            None => Ok(Box::pin(stream::empty())),
        }
    }

    fn relay(&self, turn: RelayTurn, session: Arc<ToolSession>, span: Span) -> RelayStream {
        let llm = Arc::clone(&self.llm);
        let conversations = self.conversations.clone();
        let model = self.model.clone();
        let max_steps = self.max_steps;
        let tools = if self.llm.capabilities().supports_function_calling() {
            session.function_declarations()
        } else {
            warn!(
                provider = self.llm.name(),
                "Provider cannot call functions; tool set withheld"
            );
            Vec::new()
        };

        let mut messages = Vec::with_capacity(turn.messages.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(turn.messages);
        let RelayTurn {
            conversation_id,
            user_id,
            ..
        } = turn;

        span.record("stage", RelayStage::Streaming.as_str());

        Box::pin(async_stream::stream! {
            let mut full_content = String::new();
            let mut step: u32 = 0;

            loop {
                step += 1;
                let request = ChatRequest::new(messages.clone())
                    .with_model(&model)
                    .with_streaming()
                    .with_tools(tools.clone());

                let mut llm_stream = match llm.complete_stream(&request).await {
                    Ok(s) => s,
                    Err(e) => {
                        span.record("stage", RelayStage::Failed.as_str());
                        error!(parent: &span, step, error = %e, "Model request failed");
                        yield Err(e);
                        return;
                    }
                };

                let mut step_text = String::new();
                let mut pending_calls = ToolCallAccumulator::new();
                while let Some(chunk_result) = llm_stream.next().await {
                    match chunk_result {
                        Ok(chunk) => {
                            for delta in chunk.tool_calls {
                                pending_calls.push(delta);
                            }
                            if !chunk.delta.is_empty() {
                                step_text.push_str(&chunk.delta);
                                yield Ok(Bytes::from(chunk.delta));
                            }
                        }
                        Err(e) => {
                            span.record("stage", RelayStage::Failed.as_str());
                            error!(parent: &span, step, error = %e, "Model stream failed mid-reply");
                            yield Err(e);
                            return;
                        }
                    }
                }
                full_content.push_str(&step_text);

                if pending_calls.is_empty() {
                    break;
                }

                let calls = match pending_calls.finish() {
                    Ok(calls) => calls,
                    Err(e) => {
                        span.record("stage", RelayStage::Failed.as_str());
                        error!(parent: &span, step, error = %e, "Malformed tool call from model");
                        yield Err(e);
                        return;
                    }
                };

                messages.push(ChatMessage::assistant_with_tool_calls(step_text, calls.clone()));
                for call in &calls {
                    let output = execute_tool_call(&session, &user_id, call).await;
                    messages.push(ChatMessage::tool_result(call.id.clone(), output));
                }

                if step >= max_steps {
                    warn!(parent: &span, max_steps, "Step limit reached; concluding turn");
                    break;
                }
            }

            match conversations
                .append_message(&conversation_id, &user_id, &full_content, MessageRole::Assistant)
                .await
            {
                Ok(message) => {
                    info!(parent: &span, message_id = %message.id, steps = step, "Assistant reply persisted");
                }
                Err(e) => {
                    error!(parent: &span, error = %e, "Failed to persist assistant reply");
                }
            }
            span.record("stage", RelayStage::Completed.as_str());
        })
    }
}

/// Run one tool call; failures are reported back to the model as the result
async fn execute_tool_call(session: &ToolSession, user_id: &str, call: &FunctionCall) -> String {
    let started = Instant::now();
    let result = session.call_tool(&call.name, call.args.clone()).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(output) => {
            AppLogger::log_tool_call(user_id, &call.name, !output.is_error, duration_ms);
            output.content
        }
        Err(e) => {
            AppLogger::log_tool_call(user_id, &call.name, false, duration_ms);
            json!({ "error": e.message }).to_string()
        }
    }
}
