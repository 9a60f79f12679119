// ABOUTME: Chat route handlers for the tool-augmented assistant
// ABOUTME: Streams replies over POST /api/chat and serves conversation and message history
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Chat routes
//!
//! `POST /api/chat` runs one turn: validate, authenticate, resolve the
//! conversation, persist the user message, resolve the tool session and relay
//! the model reply as `text/plain`. The conversation id travels back in the
//! `X-Conversation-Id` header. The history endpoints serve the sidebar.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{
        header::{HeaderName, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument, Span};

use crate::{
    auth::AuthenticatedUser,
    cache::ToolSessionKey,
    constants::{error_messages, headers},
    database::{ConversationRecord, MessageRecord},
    errors::{AppError, AppResult},
    llm::{ChatMessage, MessageRole},
    middleware::create_chat_span,
    resources::ServerResources,
    services::{RelayStage, RelayTurn},
};

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    /// Conversation so far; the last entry is the new user message
    #[serde(default)]
    pub messages: Option<Vec<IncomingMessage>>,
    /// Conversation to continue; absent on the first message
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// One message of the client's conversation
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// `user`, `assistant` or `system`
    pub role: String,
    /// Message text
    #[serde(default)]
    pub content: String,
}

impl IncomingMessage {
    /// Model message for known roles
    fn to_chat_message(&self) -> Option<ChatMessage> {
        match self.role.as_str() {
            "user" => Some(ChatMessage::user(&self.content)),
            "assistant" => Some(ChatMessage::assistant(&self.content)),
            "system" => Some(ChatMessage::system(&self.content)),
            _ => None,
        }
    }
}

/// Response for listing conversations
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    /// Conversations, most recently updated first
    pub conversations: Vec<ConversationSummary>,
}

/// Summary of a conversation for listing
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation ID
    pub id: String,
    /// Conversation title
    pub title: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl From<ConversationRecord> for ConversationSummary {
    fn from(record: ConversationRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Response for a conversation's messages
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    /// Messages, oldest first
    pub messages: Vec<MessageResponse>,
}

/// Message as shown to the client
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Message ID
    pub id: String,
    /// Message text
    pub content: String,
    /// `user` or `assistant`
    pub role: String,
    /// Creation timestamp
    pub created_at: String,
}

impl From<MessageRecord> for MessageResponse {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            content: record.content,
            role: record.role,
            created_at: record.created_at,
        }
    }
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/chat", post(Self::chat))
            .route("/api/conversations", get(Self::list_conversations))
            .route(
                "/api/conversations/:conversation_id/messages",
                get(Self::get_messages),
            )
            .with_state(resources)
    }

    /// Validate the body: at least one message is required
    fn validate(body: Result<Json<ChatRequestBody>, JsonRejection>) -> AppResult<ChatRequestBody> {
        let Json(body) = body.map_err(|rejection| {
            AppError::invalid_input(format!("Invalid request body: {}", rejection.body_text()))
        })?;

        match &body.messages {
            Some(messages) if !messages.is_empty() => Ok(body),
            _ => Err(AppError::missing_field(error_messages::MESSAGES_REQUIRED)),
        }
    }

    /// Email of the caller; tool sessions are opened on its behalf
    fn require_email(user: &AuthenticatedUser) -> AppResult<String> {
        user.email
            .clone()
            .ok_or_else(|| AppError::invalid_input(error_messages::EMAIL_NOT_FOUND))
    }

    /// Run one chat turn and stream the reply
    async fn chat(
        State(resources): State<Arc<ServerResources>>,
        request_headers: HeaderMap,
        body: Result<Json<ChatRequestBody>, JsonRejection>,
    ) -> Result<Response, AppError> {
        let span = create_chat_span();
        let result = Self::run_turn(&resources, &request_headers, body, span.clone())
            .instrument(span.clone())
            .await;

        if let Err(e) = &result {
            span.record("stage", RelayStage::Failed.as_str());
            debug!(parent: &span, error = %e, "Chat turn failed");
        }
        result
    }

    async fn run_turn(
        resources: &Arc<ServerResources>,
        request_headers: &HeaderMap,
        body: Result<Json<ChatRequestBody>, JsonRejection>,
        span: Span,
    ) -> Result<Response, AppError> {
        let body = Self::validate(body)?;
        let messages = body.messages.unwrap_or_default();
        let latest = messages
            .last()
            .ok_or_else(|| AppError::missing_field(error_messages::MESSAGES_REQUIRED))?
            .content
            .clone();

        let user = resources.auth.authenticate(request_headers).await?;
        span.record("user_id", user.id.as_str());
        let email = Self::require_email(&user)?;

        span.record("stage", RelayStage::ResolvingConversation.as_str());
        let conversation_id = resources
            .conversations
            .ensure_conversation(&user.id, body.conversation_id.as_deref(), &latest)
            .await?;
        span.record("conversation_id", conversation_id.as_str());

        span.record("stage", RelayStage::PersistingUserMessage.as_str());
        resources
            .conversations
            .append_message(&conversation_id, &user.id, &latest, MessageRole::User)
            .await?;

        span.record("stage", RelayStage::ResolvingToolSession.as_str());
        let key = ToolSessionKey::new(&user.id, &conversation_id);
        let factory = &resources.session_factory;
        let session = resources
            .tool_sessions
            .get_or_create(&key, || factory.establish(key.clone(), &email))
            .await?;

        let turn = RelayTurn {
            conversation_id: conversation_id.clone(),
            user_id: user.id,
            messages: messages
                .iter()
                .filter_map(IncomingMessage::to_chat_message)
                .collect(),
        };
        let stream = resources.relay.start(turn, session, span).await?;

        let conversation_header = HeaderValue::from_str(&conversation_id)
            .map_err(|e| AppError::internal(format!("Invalid conversation id header: {e}")))?;

        Ok((
            StatusCode::OK,
            [
                (CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8)),
                (
                    HeaderName::from_static(headers::CONVERSATION_ID),
                    conversation_header,
                ),
            ],
            Body::from_stream(stream),
        )
            .into_response())
    }

    /// List the caller's conversations
    async fn list_conversations(
        State(resources): State<Arc<ServerResources>>,
        request_headers: HeaderMap,
    ) -> Result<Json<ConversationListResponse>, AppError> {
        let user = resources.auth.authenticate(&request_headers).await?;
        let conversations = resources.conversations.list_conversations(&user.id).await?;

        Ok(Json(ConversationListResponse {
            conversations: conversations.into_iter().map(Into::into).collect(),
        }))
    }

    /// Messages of one of the caller's conversations
    async fn get_messages(
        State(resources): State<Arc<ServerResources>>,
        request_headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Json<MessageListResponse>, AppError> {
        let user = resources.auth.authenticate(&request_headers).await?;
        let messages = resources
            .conversations
            .history(&conversation_id, &user.id)
            .await?;

        Ok(Json(MessageListResponse {
            messages: messages.into_iter().map(Into::into).collect(),
        }))
    }
}
