// ABOUTME: Database operations for chat conversations and messages
// ABOUTME: SQLite implementation of ChatStore with per-user conversation isolation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::ChatStore;
use crate::errors::{AppError, AppResult};
use crate::llm::MessageRole;

// ============================================================================
// Database Record Types
// ============================================================================

/// Database representation of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// User ID who owns the conversation
    pub user_id: String,
    /// Title derived from the first user message
    pub title: Option<String>,
    /// When the conversation was created (RFC 3339)
    pub created_at: String,
    /// When a message was last appended (RFC 3339)
    pub updated_at: String,
}

/// Database representation of a chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation ID this message belongs to
    pub conversation_id: String,
    /// Author of the conversation
    pub user_id: String,
    /// `user` or `assistant`
    pub role: String,
    /// Message content
    pub content: String,
    /// When the message was created (RFC 3339)
    pub created_at: String,
}

impl ConversationRecord {
    fn from_row(r: &SqliteRow) -> Self {
        Self {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }
    }
}

impl MessageRecord {
    fn from_row(r: &SqliteRow) -> Self {
        Self {
            id: r.get("id"),
            conversation_id: r.get("conversation_id"),
            user_id: r.get("user_id"),
            role: r.get("role"),
            content: r.get("content"),
            created_at: r.get("created_at"),
        }
    }
}

/// Microsecond precision keeps lexical order equal to chronological order
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// Chat Manager
// ============================================================================

/// Chat database operations manager
#[derive(Clone)]
pub struct ChatManager {
    pool: SqlitePool,
}

impl ChatManager {
    /// Create a new chat manager
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for ChatManager {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> AppResult<ConversationRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            r"
            INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ",
        )
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        Ok(ConversationRecord {
            id,
            user_id: user_id.to_owned(),
            title: title.map(ToOwned::to_owned),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
        role: MessageRole,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let role_str = role.as_str();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, user_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(user_id)
        .bind(role_str)
        .bind(content)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to add message: {e}")))?;

        sqlx::query(
            r"
            UPDATE conversations
            SET updated_at = $1
            WHERE id = $2
            ",
        )
        .bind(&now)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to update conversation timestamp: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit message: {e}")))?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            user_id: user_id.to_owned(),
            role: role_str.to_owned(),
            content: content.to_owned(),
            created_at: now,
        })
    }

    async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, user_id, role, content, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, rowid ASC
            ",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        Ok(rows.iter().map(MessageRecord::from_row).collect())
    }

    async fn list_conversations(&self, user_id: &str) -> AppResult<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE user_id = $1
            ORDER BY updated_at DESC, rowid DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list conversations: {e}")))?;

        Ok(rows.iter().map(ConversationRecord::from_row).collect())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE id = $1 AND user_id = $2
            ",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        Ok(row.as_ref().map(ConversationRecord::from_row))
    }
}
