// ABOUTME: Conversation lifecycle domain service
// ABOUTME: Lazily creates conversations with a derived title and appends messages to history
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use tracing::{debug, info};

use crate::constants::{defaults, error_messages};
use crate::database::{ChatStore, ConversationRecord, MessageRecord};
use crate::errors::{AppError, AppResult};
use crate::llm::MessageRole;

/// Creates conversations and appends messages through a [`ChatStore`]
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
}

impl ConversationService {
    /// Create the service over a store
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Return `existing` unchanged, or create a conversation titled after `first_message`
    ///
    /// Business rules:
    /// - An empty `existing` id counts as absent
    /// - Ownership of `existing` is not checked here
    /// - Creation is attempted once; no retry
    ///
    /// # Errors
    ///
    /// Returns a database error carrying the public message
    /// `"Failed to create conversation"` when creation fails.
    pub async fn ensure_conversation(
        &self,
        user_id: &str,
        existing: Option<&str>,
        first_message: &str,
    ) -> AppResult<String> {
        if let Some(id) = existing.filter(|id| !id.is_empty()) {
            debug!(conversation_id = %id, "Reusing conversation");
            return Ok(id.to_owned());
        }

        let title = derive_title(first_message);
        let conversation = self
            .store
            .create_conversation(user_id, Some(&title))
            .await
            .map_err(|e| e.with_public_message(error_messages::CONVERSATION_CREATE_FAILED))?;

        info!(conversation_id = %conversation.id, "Conversation created");
        Ok(conversation.id)
    }

    /// Append one message to a conversation
    ///
    /// # Errors
    ///
    /// Returns a database error if the message cannot be stored.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
        role: MessageRole,
    ) -> AppResult<MessageRecord> {
        self.store
            .add_message(conversation_id, user_id, content, role)
            .await
    }

    /// Conversations of a user, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn list_conversations(&self, user_id: &str) -> AppResult<Vec<ConversationRecord>> {
        self.store.list_conversations(user_id).await
    }

    /// Messages of a conversation owned by `user_id`, oldest first
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the conversation does not exist or belongs to another user.
    pub async fn history(&self, conversation_id: &str, user_id: &str) -> AppResult<Vec<MessageRecord>> {
        self.store
            .get_conversation(conversation_id, user_id)
            .await?
            .ok_or_else(|| AppError::not_found(error_messages::CONVERSATION_NOT_FOUND))?;

        self.store.list_messages(conversation_id).await
    }
}

/// Title for a new conversation
///
/// Whitespace is collapsed, the result keeps at most
/// [`defaults::TITLE_MAX_CHARS`] characters and ends in `...` when cut.
/// Blank text yields `"New Chat"`.
#[must_use]
pub fn derive_title(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return defaults::CONVERSATION_TITLE.to_owned();
    }

    if collapsed.chars().count() <= defaults::TITLE_MAX_CHARS {
        return collapsed;
    }

    let mut title: String = collapsed.chars().take(defaults::TITLE_MAX_CHARS).collect();
    title.push_str(defaults::TITLE_ELLIPSIS);
    title
}
