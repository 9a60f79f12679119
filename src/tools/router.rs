// ABOUTME: HTTP client for the hosted tool-routing service session endpoint
// ABOUTME: Creates per-user sessions with the configured toolkits and returns their MCP endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ToolRouter, ToolRouterSession};
use crate::config::ToolRouterConfig;
use crate::constants::{headers, timeouts};
use crate::errors::{AppError, AppResult};

/// Request body of the session endpoint
#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    user_id: &'a str,
    toolkits: &'a [String],
}

/// Response body of the session endpoint
#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: String,
    #[serde(alias = "mcp_url")]
    url: String,
}

/// REST client for `POST {base_url}/session`
pub struct HttpToolRouter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpToolRouter {
    /// Create a router client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts::CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(timeouts::SERVICE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Create a router client from the server's tool-router settings
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `TOOL_ROUTER_URL` is not set.
    pub fn from_config(config: &ToolRouterConfig) -> AppResult<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| AppError::config("TOOL_ROUTER_URL is not configured"))?;
        Self::new(base_url, config.api_key.clone())
    }

    fn session_url(&self) -> String {
        format!("{}/session", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ToolRouter for HttpToolRouter {
    #[instrument(skip(self, user_email, toolkits), fields(toolkits = ?toolkits))]
    async fn create_session(
        &self,
        user_email: &str,
        toolkits: &[String],
    ) -> AppResult<ToolRouterSession> {
        let mut request = self.client.post(self.session_url()).json(&CreateSessionRequest {
            user_id: user_email,
            toolkits,
        });
        if let Some(api_key) = &self.api_key {
            request = request.header(headers::TOOL_ROUTER_API_KEY, api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::tool_session(format!("Tool router request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::tool_session(format!(
                "Tool router returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let session: CreateSessionResponse = response.json().await.map_err(|e| {
            AppError::tool_session(format!("Invalid tool router session response: {e}"))
        })?;

        debug!(session_id = %session.session_id, "Tool router session created");
        Ok(ToolRouterSession {
            url: session.url,
            session_id: session.session_id,
        })
    }
}
