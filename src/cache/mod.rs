// ABOUTME: In-process caches keyed by user and conversation
// ABOUTME: Hosts the bounded single-flight tool session cache
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Bounded, single-flight cache of established tool sessions
pub mod tool_sessions;

pub use tool_sessions::ToolSessionCache;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a tool session: one per user and conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolSessionKey {
    /// Authenticated user id
    pub user_id: String,
    /// Conversation the session serves
    pub conversation_id: String,
}

impl ToolSessionKey {
    /// Build a key
    #[must_use]
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

impl fmt::Display for ToolSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.conversation_id)
    }
}
