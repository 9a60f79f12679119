// ABOUTME: Route module organization for the chat server HTTP endpoints
// ABOUTME: Chat turn streaming, conversation history and health routes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Route module
//!
//! Each domain module contains only route definitions and thin handlers that
//! delegate to the service layer.

/// Chat turn and conversation history routes
pub mod chat;
/// Health check route
pub mod health;

pub use chat::ChatRoutes;
pub use health::HealthRoutes;
