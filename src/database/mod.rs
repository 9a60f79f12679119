// ABOUTME: Database management for conversation and message persistence
// ABOUTME: Owns the SQLite pool, runs schema migrations and defines the ChatStore contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Database Management
//!
//! Conversations and messages are persisted through the [`ChatStore`] trait.
//! [`ChatManager`] is the SQLite implementation; the schema is embedded and
//! applied by [`Database::migrate`].

mod chat;

pub use chat::{ChatManager, ConversationRecord, MessageRecord};

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::errors::AppResult;
use crate::llm::MessageRole;

/// Persistence contract for conversations and messages
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create a conversation owned by `user_id`
    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> AppResult<ConversationRecord>;

    /// Append a message and bump the conversation's `updated_at`
    async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
        role: MessageRole,
    ) -> AppResult<MessageRecord>;

    /// All messages of a conversation in creation order
    async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>>;

    /// Conversations of a user, most recently updated first
    async fn list_conversations(&self, user_id: &str) -> AppResult<Vec<ConversationRecord>>;

    /// A conversation if it exists and belongs to `user_id`
    async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ConversationRecord>>;
}

/// Database handle owning the connection pool
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection and apply migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the file cannot be opened or
    /// a migration fails
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = if database_url.contains(":memory:") {
            // Every in-memory connection is a separate database, so pin one
            let options = SqliteConnectOptions::from_str(database_url)
                .context("Invalid DATABASE_URL")?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            // Ensure SQLite creates the database file if it doesn't exist
            let options = SqliteConnectOptions::from_str(database_url)
                .context("Invalid DATABASE_URL")?
                .create_if_missing(true);
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
            }
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let db = Self { pool };
        db.migrate().await?;

        info!("Database ready at {database_url}");
        Ok(db)
    }

    /// Get a reference to the database pool
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails
    pub async fn migrate(&self) -> Result<()> {
        self.migrate_chat().await?;
        Ok(())
    }

    /// Create conversation and message tables
    async fn migrate_chat(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, updated_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Chat schema migrated");
        Ok(())
    }

    /// Build the SQLite chat store on this pool
    #[must_use]
    pub fn chat_manager(&self) -> ChatManager {
        ChatManager::new(self.pool.clone())
    }
}
