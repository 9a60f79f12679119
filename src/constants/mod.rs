// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Service names, header names, caller-facing error messages and configuration defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! Constants are grouped into logical domains rather than being in a single large file.

/// Service identification
pub mod service_names {
    /// Service name used in logs and the health endpoint
    pub const RUBE_CHAT_SERVER: &str = "rube-chat-server";
    /// Upstream LLM service label used in error messages
    pub const LLM_PROVIDER: &str = "llm";
    /// Supabase-style auth service label
    pub const AUTH_SERVICE: &str = "auth";
    /// Tool-routing service label
    pub const TOOL_ROUTER: &str = "tool-router";
}

/// HTTP header names
pub mod headers {
    /// Response header carrying the active conversation id
    pub const CONVERSATION_ID: &str = "x-conversation-id";
    /// Cookie holding the Supabase access token when no bearer header is sent
    pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
    /// API key header understood by Supabase and the tool router
    pub const API_KEY: &str = "apikey";
    /// API key header used by the tool-routing service
    pub const TOOL_ROUTER_API_KEY: &str = "x-api-key";
    /// MCP session header echoed on every call after `initialize`
    pub const MCP_SESSION_ID: &str = "mcp-session-id";
}

/// Caller-facing error messages
pub mod error_messages {
    /// Missing or empty `messages` array
    pub const MESSAGES_REQUIRED: &str = "messages is required";
    /// No valid session
    pub const UNAUTHORIZED: &str = "Unauthorized - Please sign in";
    /// Authenticated user without an email address
    pub const EMAIL_NOT_FOUND: &str = "User email not found";
    /// Conversation record could not be created
    pub const CONVERSATION_CREATE_FAILED: &str = "Failed to create conversation";
    /// Generic message for every other internal failure
    pub const CHAT_REQUEST_FAILED: &str = "Failed to process chat request";
    /// Conversation not visible to the caller
    pub const CONVERSATION_NOT_FOUND: &str = "Conversation";
}

/// Default configuration values
pub mod defaults {
    /// Default HTTP port
    pub const HTTP_PORT: u16 = 8081;
    /// Default database location
    pub const DATABASE_URL: &str = "sqlite:./data/chat.db";
    /// Default OpenAI-compatible endpoint
    pub const LLM_BASE_URL: &str = "https://api.openai.com/v1";
    /// Default chat model
    pub const LLM_MODEL: &str = "gpt-4o";
    /// Hard cap on generation steps per turn
    pub const LLM_MAX_STEPS: u32 = 10;
    /// Default toolkits requested from the tool router
    pub const TOOL_ROUTER_TOOLKITS: &str = "gmail";
    /// Title used when the first message has no usable text
    pub const CONVERSATION_TITLE: &str = "New Chat";
    /// Maximum number of characters kept in a derived title
    pub const TITLE_MAX_CHARS: usize = 50;
    /// Suffix appended to truncated titles
    pub const TITLE_ELLIPSIS: &str = "...";
}

/// Tool session cache defaults
pub mod cache {
    /// Maximum number of resident tool sessions
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;
    /// Idle time after which a session is closed
    pub const DEFAULT_IDLE_TTL_SECS: u64 = 1800;
    /// Interval of the background expiry sweep
    pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
}

/// HTTP client timeouts
pub mod timeouts {
    /// Connection timeout for outbound HTTP clients
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    /// Request timeout for streaming LLM calls
    pub const LLM_REQUEST_TIMEOUT_SECS: u64 = 120;
    /// Request timeout for auth and tool-router calls
    pub const SERVICE_REQUEST_TIMEOUT_SECS: u64 = 30;
}

/// MCP protocol constants
pub mod mcp {
    /// Protocol version announced during `initialize`
    pub const PROTOCOL_VERSION: &str = "2024-11-05";
}
