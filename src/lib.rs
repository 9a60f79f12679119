// ABOUTME: Main library entry point for the Rube chat relay server
// ABOUTME: Streams tool-augmented LLM replies and persists conversation history
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

// Crate-level attributes:
// - deny(unsafe_code): Zero-tolerance unsafe policy.
#![deny(unsafe_code)]

//! # Rube Chat Server
//!
//! A chat backend in which an authenticated user converses with an LLM-backed
//! assistant that can invoke third-party tool integrations through a hosted
//! tool-routing service.
//!
//! ## Architecture
//!
//! - **Session Cache** ([`cache::ToolSessionCache`]): one established tool
//!   session per user and conversation, created once and reused
//! - **Stream Relay** ([`services::StreamRelay`]): forwards model text as it
//!   is generated and persists the complete reply
//! - **Conversation Lifecycle** ([`services::ConversationService`]): creates
//!   conversations on the first message and appends every message
//!
//! Collaborators (auth, persistence, the model and the tool router) sit behind
//! traits so each can be replaced.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use rube_chat_server::config::ServerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Rube chat server configured with port: HTTP={}", config.http_port);
//!     Ok(())
//! }
//! ```

// ── Public API ──────────────────────────────────────────────────────────
// These modules are used by the binary (src/bin/) and integration tests (tests/).

/// Caller authentication against the auth service
pub mod auth;

/// Tool session cache
pub mod cache;

/// Configuration management
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Conversation and message persistence
pub mod database;

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// JSON-RPC 2.0 types used by the tool transport
pub mod jsonrpc;

/// LLM provider abstraction for streaming chat
pub mod llm;

/// Production logging and structured output
pub mod logging;

/// HTTP middleware for CORS and request spans
pub mod middleware;

/// Shared server resources
pub mod resources;

/// `HTTP` routes
pub mod routes;

/// Router assembly and server lifecycle
pub mod server;

/// Conversation lifecycle and stream relay services
pub mod services;

/// Tool-routing sessions and transports
pub mod tools;
