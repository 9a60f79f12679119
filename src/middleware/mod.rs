// ABOUTME: HTTP middleware for the chat API
// ABOUTME: CORS setup and per-request tracing spans
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// CORS layer construction
pub mod cors;

// CORS configuration
pub use cors::setup_cors;

use tracing::Span;

use crate::services::RelayStage;

/// Span covering one chat turn; `stage` follows [`RelayStage`]
#[must_use]
pub fn create_chat_span() -> Span {
    tracing::info_span!(
        "chat_turn",
        stage = RelayStage::Authenticating.as_str(),
        user_id = tracing::field::Empty,
        conversation_id = tracing::field::Empty,
    )
}
