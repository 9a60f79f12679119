// ABOUTME: System prompts for LLM interactions loaded at compile time
// ABOUTME: Provides the tool-augmented assistant system prompt prepended to every turn
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # System Prompts
//!
//! Prompts are loaded at compile time from markdown files for easy maintenance.

/// Assistant system prompt
///
/// Describes the assistant's role, how it should use the tools resolved from the
/// user's tool-routing session, and how to report tool failures.
pub const ASSISTANT_SYSTEM_PROMPT: &str = include_str!("assistant_system.md");

/// Get the default system prompt for chat turns
///
/// Overridden by `LLM_SYSTEM_PROMPT` when set.
#[must_use]
pub const fn get_assistant_system_prompt() -> &'static str {
    ASSISTANT_SYSTEM_PROMPT
}
