// ABOUTME: Caller authentication against a Supabase-style auth service
// ABOUTME: Extracts the access token from the Authorization header or session cookie and resolves the user
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Authentication
//!
//! Authentication is delegated: the caller's access token is presented to
//! `GET {SUPABASE_URL}/auth/v1/user`, which answers with the user record.
//! Tokens are read from `Authorization: Bearer <token>` first and from the
//! `sb-access-token` cookie otherwise.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::constants::{headers, service_names, timeouts};
use crate::errors::{AppError, AppResult};
use crate::logging::AppLogger;

/// The verified caller of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Stable user id
    pub id: String,
    /// Email address; required to open tool sessions
    pub email: Option<String>,
}

/// Verifies callers
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve the caller of a request
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` when no valid credentials are presented.
    async fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthenticatedUser>;
}

/// Access token from `Authorization: Bearer` or the session cookie
#[must_use]
pub fn extract_access_token(request_headers: &HeaderMap) -> Option<String> {
    let bearer = request_headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_owned());
    }

    request_headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == headers::ACCESS_TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_owned())
}

/// User record returned by `/auth/v1/user`
#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// [`AuthProvider`] backed by the Supabase auth REST API
pub struct SupabaseAuthProvider {
    client: Client,
    base_url: Option<String>,
    anon_key: Option<String>,
}

impl SupabaseAuthProvider {
    /// Create a provider from the auth settings
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &AuthConfig) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts::CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(timeouts::SERVICE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
        })
    }

    async fn fetch_user(&self, token: &str) -> AppResult<SupabaseUser> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::config("SUPABASE_URL is not configured"))?;
        let url = format!("{}/auth/v1/user", base_url.trim_end_matches('/'));

        let mut request = self.client.get(url).bearer_auth(token);
        if let Some(key) = &self.anon_key {
            request = request.header(headers::API_KEY, key);
        }

        let response = request.send().await.map_err(|e| {
            AppError::external_service(service_names::AUTH_SERVICE, format!("request failed: {e}"))
        })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            debug!(%status, "Auth service rejected token");
            return Err(AppError::auth_required());
        }
        if !status.is_success() {
            return Err(AppError::external_service(
                service_names::AUTH_SERVICE,
                format!("returned {status}"),
            ));
        }

        response.json().await.map_err(|e| {
            AppError::external_service(
                service_names::AUTH_SERVICE,
                format!("invalid user response: {e}"),
            )
        })
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthProvider {
    async fn authenticate(&self, request_headers: &HeaderMap) -> AppResult<AuthenticatedUser> {
        let Some(token) = extract_access_token(request_headers) else {
            AppLogger::log_auth_event(None, false, "missing access token");
            return Err(AppError::auth_required());
        };

        match self.fetch_user(&token).await {
            Ok(user) => {
                AppLogger::log_auth_event(Some(&user.id), true, "access token verified");
                Ok(AuthenticatedUser {
                    id: user.id,
                    email: user.email.filter(|email| !email.is_empty()),
                })
            }
            Err(e) => {
                AppLogger::log_auth_event(None, false, &e.message);
                Err(e)
            }
        }
    }
}
