// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Parses database, auth, LLM, tool-router and session cache settings from environment variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration management for production deployment

use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::{cache, defaults};

/// Environment type for security and other configurations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Production deployment
    Production,
    /// Test runs
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Persistence store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (`sqlite:<path>` or `sqlite::memory:`)
    pub url: String,
}

/// Supabase-style auth service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the auth service
    pub supabase_url: Option<String>,
    /// Anonymous API key sent with every auth request
    pub supabase_anon_key: Option<String>,
}

/// OpenAI-compatible LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer key; local servers may not need one
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Maximum generation steps per chat turn
    pub max_steps: u32,
    /// Replacement for the bundled system prompt
    pub system_prompt: Option<String>,
}

/// Tool-routing service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRouterConfig {
    /// Base URL of the tool-routing service
    pub base_url: Option<String>,
    /// API key for the tool-routing service
    pub api_key: Option<String>,
    /// Toolkits requested for every session
    pub toolkits: Vec<String>,
}

/// Tool session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    /// Maximum number of resident sessions
    pub max_entries: usize,
    /// Idle time after which a session is closed
    pub idle_ttl: Duration,
    /// Interval of the background expiry sweep
    pub cleanup_interval: Duration,
    /// Run the background sweep (disabled in some tests)
    pub enable_background_cleanup: bool,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: cache::DEFAULT_MAX_ENTRIES,
            idle_ttl: Duration::from_secs(cache::DEFAULT_IDLE_TTL_SECS),
            cleanup_interval: Duration::from_secs(cache::DEFAULT_CLEANUP_INTERVAL_SECS),
            enable_background_cleanup: true,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// LLM configuration
    pub llm: LlmConfig,
    /// Tool router configuration
    pub tool_router: ToolRouterConfig,
    /// Tool session cache configuration
    pub session_cache: SessionCacheConfig,
    /// CORS configuration
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: defaults::HTTP_PORT,
            environment: Environment::default(),
            database: DatabaseConfig {
                url: defaults::DATABASE_URL.to_owned(),
            },
            auth: AuthConfig::default(),
            llm: LlmConfig {
                base_url: defaults::LLM_BASE_URL.to_owned(),
                api_key: None,
                model: defaults::LLM_MODEL.to_owned(),
                max_steps: defaults::LLM_MAX_STEPS,
                system_prompt: None,
            },
            tool_router: ToolRouterConfig {
                base_url: None,
                api_key: None,
                toolkits: parse_list(defaults::TOOL_ROUTER_TOOLKITS),
            },
            session_cache: SessionCacheConfig::default(),
            cors: CorsConfig {
                allowed_origins: vec!["*".to_owned()],
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let config = Self {
            http_port: env_var_or("HTTP_PORT", &defaults::HTTP_PORT.to_string())
                .parse()
                .context("Invalid HTTP_PORT value")?,
            environment: Environment::from_str_or_default(&env_var_or(
                "ENVIRONMENT",
                "development",
            )),

            database: DatabaseConfig {
                url: env_var_or("DATABASE_URL", defaults::DATABASE_URL),
            },

            auth: AuthConfig {
                supabase_url: optional_env("SUPABASE_URL"),
                supabase_anon_key: optional_env("SUPABASE_ANON_KEY"),
            },

            llm: LlmConfig {
                base_url: env_var_or("LLM_BASE_URL", defaults::LLM_BASE_URL),
                api_key: optional_env("LLM_API_KEY"),
                model: env_var_or("LLM_MODEL", defaults::LLM_MODEL),
                max_steps: env_var_or("LLM_MAX_STEPS", &defaults::LLM_MAX_STEPS.to_string())
                    .parse()
                    .context("Invalid LLM_MAX_STEPS value")?,
                system_prompt: optional_env("LLM_SYSTEM_PROMPT"),
            },

            tool_router: ToolRouterConfig {
                base_url: optional_env("TOOL_ROUTER_URL"),
                api_key: optional_env("TOOL_ROUTER_API_KEY"),
                toolkits: parse_list(&env_var_or(
                    "TOOL_ROUTER_TOOLKITS",
                    defaults::TOOL_ROUTER_TOOLKITS,
                )),
            },

            session_cache: SessionCacheConfig {
                max_entries: env_var_or(
                    "TOOL_SESSION_CACHE_MAX_ENTRIES",
                    &cache::DEFAULT_MAX_ENTRIES.to_string(),
                )
                .parse()
                .context("Invalid TOOL_SESSION_CACHE_MAX_ENTRIES value")?,
                idle_ttl: Duration::from_secs(
                    env_var_or(
                        "TOOL_SESSION_IDLE_TTL_SECS",
                        &cache::DEFAULT_IDLE_TTL_SECS.to_string(),
                    )
                    .parse()
                    .context("Invalid TOOL_SESSION_IDLE_TTL_SECS value")?,
                ),
                cleanup_interval: Duration::from_secs(
                    env_var_or(
                        "TOOL_SESSION_CLEANUP_INTERVAL_SECS",
                        &cache::DEFAULT_CLEANUP_INTERVAL_SECS.to_string(),
                    )
                    .parse()
                    .context("Invalid TOOL_SESSION_CLEANUP_INTERVAL_SECS value")?,
                ),
                enable_background_cleanup: true,
            },

            cors: CorsConfig {
                allowed_origins: parse_origins(&env_var_or("CORS_ORIGINS", "*")),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error for values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.llm.max_steps == 0 {
            return Err(anyhow::anyhow!("LLM_MAX_STEPS must be at least 1"));
        }
        if self.session_cache.max_entries == 0 {
            return Err(anyhow::anyhow!(
                "TOOL_SESSION_CACHE_MAX_ENTRIES must be at least 1"
            ));
        }
        if self.session_cache.cleanup_interval.is_zero() {
            return Err(anyhow::anyhow!(
                "TOOL_SESSION_CLEANUP_INTERVAL_SECS must be at least 1"
            ));
        }

        if self.auth.supabase_url.is_none() {
            warn!("SUPABASE_URL is not set; authenticated requests will fail");
        }
        if self.llm.api_key.is_none() {
            warn!("LLM_API_KEY is not set; requests to {} are unauthenticated", self.llm.base_url);
        }

        Ok(())
    }

    /// Get a summary of the configuration for logging (without secrets)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Rube Chat Server Configuration:\n\
             - HTTP Port: {}\n\
             - Environment: {}\n\
             - Database: {}\n\
             - Auth: {}\n\
             - LLM: {} ({}, max {} steps)\n\
             - Tool Router: {} [{}]\n\
             - Session Cache: {} entries, idle TTL {}s",
            self.http_port,
            self.environment,
            if self.database.url.contains(":memory:") {
                "SQLite (in-memory)"
            } else {
                "SQLite"
            },
            if self.auth.supabase_url.is_some() {
                "Configured"
            } else {
                "Not configured"
            },
            self.llm.model,
            self.llm.base_url,
            self.llm.max_steps,
            if self.tool_router.base_url.is_some() {
                "Configured"
            } else {
                "Not configured"
            },
            self.tool_router.toolkits.join(","),
            self.session_cache.max_entries,
            self.session_cache.idle_ttl.as_secs(),
        )
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Get a non-empty environment variable
fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a comma-separated list
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse comma-separated CORS origins
fn parse_origins(origins_str: &str) -> Vec<String> {
    if origins_str == "*" {
        vec!["*".to_owned()]
    } else {
        parse_list(origins_str)
    }
}
