// ABOUTME: Domain service layer behind the chat routes
// ABOUTME: Conversation lifecycle management and the streaming relay of assistant replies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Domain service layer
//!
//! Route handlers validate and authenticate; everything that touches the
//! conversation store, the tool session or the model lives here.

/// Conversation creation, title derivation and message appends
pub mod conversations;

/// Step-bounded streaming relay of the model reply
pub mod relay;

pub use conversations::ConversationService;
pub use relay::{RelayStream, RelayTurn, StreamRelay};

use std::fmt;

/// Progress of one chat turn, recorded on the `chat_turn` span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    /// Verifying the caller
    Authenticating,
    /// Reusing or creating the conversation record
    ResolvingConversation,
    /// Appending the user message
    PersistingUserMessage,
    /// Looking up or establishing the tool session
    ResolvingToolSession,
    /// Forwarding model output
    Streaming,
    /// Reply delivered and persisted
    Completed,
    /// Turn aborted
    Failed,
}

impl RelayStage {
    /// Span field value
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::ResolvingConversation => "resolving_conversation",
            Self::PersistingUserMessage => "persisting_user_message",
            Self::ResolvingToolSession => "resolving_tool_session",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
