// ABOUTME: Established tool-routing sessions and the factory that creates them
// ABOUTME: A ToolSession owns its connection and closes it exactly once on release or drop
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use super::{
    ToolCallOutput, ToolConnection, ToolDefinition, ToolRouter, ToolRouterSession, ToolTransport,
};
use crate::cache::ToolSessionKey;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::FunctionDeclaration;

/// A connected tool-routing session with its resolved tool set
pub struct ToolSession {
    key: ToolSessionKey,
    descriptor: ToolRouterSession,
    connection: Arc<dyn ToolConnection>,
    tools: Vec<ToolDefinition>,
    closed: AtomicBool,
}

impl ToolSession {
    /// Wrap an established connection
    #[must_use]
    pub fn new(
        key: ToolSessionKey,
        descriptor: ToolRouterSession,
        connection: Arc<dyn ToolConnection>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            key,
            descriptor,
            connection,
            tools,
            closed: AtomicBool::new(false),
        }
    }

    /// Cache key this session was created for
    #[must_use]
    pub const fn key(&self) -> &ToolSessionKey {
        &self.key
    }

    /// Remote session descriptor
    #[must_use]
    pub const fn descriptor(&self) -> &ToolRouterSession {
        &self.descriptor
    }

    /// Resolved tool set
    #[must_use]
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Tool set as model declarations
    #[must_use]
    pub fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools
            .iter()
            .map(ToolDefinition::to_function_declaration)
            .collect()
    }

    /// Whether the connection has been released
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invoke a tool through the session connection
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the remote call fails
    pub async fn call_tool(&self, name: &str, arguments: Value) -> AppResult<ToolCallOutput> {
        if self.is_closed() {
            return Err(AppError::tool_session(format!(
                "Tool session {} is closed",
                self.descriptor.session_id
            )));
        }
        self.connection.call_tool(name, arguments).await
    }

    /// Release the connection; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.connection.close().await {
            Ok(()) => debug!(key = %self.key, "Tool session closed"),
            Err(e) => warn!(key = %self.key, error = %e, "Tool session close failed"),
        }
    }
}

impl Drop for ToolSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Close in the background when dropped without an explicit close
        if let Ok(handle) = Handle::try_current() {
            let connection = Arc::clone(&self.connection);
            let key = self.key.to_string();
            handle.spawn(async move {
                if let Err(e) = connection.close().await {
                    warn!(key = %key, error = %e, "Tool session close on drop failed");
                }
            });
        } else {
            warn!(key = %self.key, "Tool session dropped outside a runtime; remote session left open");
        }
    }
}

/// Runs the remote steps that produce a [`ToolSession`]
#[derive(Clone)]
pub struct ToolSessionFactory {
    router: Arc<dyn ToolRouter>,
    transport: Arc<dyn ToolTransport>,
    toolkits: Vec<String>,
}

impl ToolSessionFactory {
    /// Create a factory requesting `toolkits` for every session
    #[must_use]
    pub fn new(
        router: Arc<dyn ToolRouter>,
        transport: Arc<dyn ToolTransport>,
        toolkits: Vec<String>,
    ) -> Self {
        Self {
            router,
            transport,
            toolkits,
        }
    }

    /// Create a remote session, connect and resolve the tool set
    ///
    /// # Errors
    ///
    /// Returns a tool session error if any remote step fails; a connection that
    /// was opened is closed before returning the error
    #[instrument(skip(self, key, user_email), fields(key = %key))]
    pub async fn establish(&self, key: ToolSessionKey, user_email: &str) -> AppResult<ToolSession> {
        let descriptor = self
            .router
            .create_session(user_email, &self.toolkits)
            .await
            .map_err(into_tool_session_error)?;

        let connection = match self.transport.connect(&descriptor).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(
                    session_id = %descriptor.session_id,
                    error = %e,
                    "Connecting to tool session failed; router session left open"
                );
                return Err(into_tool_session_error(e));
            }
        };

        let tools = match connection.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Closing connection after failed tool listing failed");
                }
                return Err(into_tool_session_error(e));
            }
        };

        info!(
            session_id = %descriptor.session_id,
            tools = tools.len(),
            "Tool session established"
        );
        Ok(ToolSession::new(key, descriptor, connection, tools))
    }
}

fn into_tool_session_error(error: AppError) -> AppError {
    if error.code == ErrorCode::ToolSessionError {
        error
    } else {
        AppError::tool_session(error.message)
    }
}
