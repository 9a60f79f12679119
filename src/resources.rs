// ABOUTME: Centralized resource container shared by the HTTP handlers
// ABOUTME: Wires auth, persistence, the tool session cache and the stream relay together
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Server Resources
//!
//! Built once at startup and handed to the router as `Arc<ServerResources>`.
//! Every collaborator is held behind its trait so tests can substitute fakes
//! through [`ServerResources::new`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::auth::{AuthProvider, SupabaseAuthProvider};
use crate::cache::ToolSessionCache;
use crate::config::ServerConfig;
use crate::database::{ChatStore, Database};
use crate::llm::{LlmProvider, OpenAiCompatibleProvider};
use crate::services::{ConversationService, StreamRelay};
use crate::tools::{HttpToolRouter, McpHttpTransport, ToolRouter, ToolSessionFactory, ToolTransport};

/// Centralized resource container for dependency injection
pub struct ServerResources {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Caller authentication
    pub auth: Arc<dyn AuthProvider>,
    /// Conversation lifecycle
    pub conversations: ConversationService,
    /// Process-wide tool session cache
    pub tool_sessions: Arc<ToolSessionCache>,
    /// Establishes tool sessions on cache misses
    pub session_factory: ToolSessionFactory,
    /// Model output relay
    pub relay: StreamRelay,
}

impl ServerResources {
    /// Assemble resources from explicit collaborators
    ///
    /// Must be called inside a tokio runtime: the session cache starts its
    /// background sweep here when enabled.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn ChatStore>,
        llm: Arc<dyn LlmProvider>,
        router: Arc<dyn ToolRouter>,
        transport: Arc<dyn ToolTransport>,
    ) -> Self {
        let conversations = ConversationService::new(store);
        let relay = StreamRelay::from_config(llm, conversations.clone(), &config.llm);
        let session_factory =
            ToolSessionFactory::new(router, transport, config.tool_router.toolkits.clone());
        let tool_sessions = Arc::new(ToolSessionCache::new(&config.session_cache));

        Self {
            config: Arc::new(config),
            auth,
            conversations,
            tool_sessions,
            session_factory,
            relay,
        }
    }

    /// Build production collaborators from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or a client cannot be
    /// configured (for example a missing `TOOL_ROUTER_URL`).
    pub async fn from_config(config: ServerConfig) -> Result<Self> {
        let database = Database::new(&config.database.url)
            .await
            .context("Failed to initialize database")?;
        info!(url = %config.database.url, "Database ready");

        let store: Arc<dyn ChatStore> = Arc::new(database.chat_manager());
        let auth: Arc<dyn AuthProvider> = Arc::new(SupabaseAuthProvider::new(&config.auth)?);
        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleProvider::from_config(&config.llm)?);
        let router: Arc<dyn ToolRouter> = Arc::new(HttpToolRouter::from_config(&config.tool_router)?);
        let transport: Arc<dyn ToolTransport> =
            Arc::new(McpHttpTransport::new(config.tool_router.api_key.clone())?);

        Ok(Self::new(config, auth, store, llm, router, transport))
    }
}
