// ABOUTME: CORS middleware configuration for the chat API
// ABOUTME: Allows the web client to call the chat endpoints and read the conversation id header
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use http::{header::HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::constants::headers;

/// Configure CORS for the chat API
///
/// Origins come from `CORS_ORIGINS`; `*` (the default) allows any origin.
/// `x-conversation-id` is exposed so browser clients can pick up the id of a
/// newly created conversation from a streamed reply.
///
/// ```bash
/// # Allow specific origins (production)
/// export CORS_ORIGINS="https://app.example.com,https://admin.example.com"
/// ```
#[must_use]
pub fn setup_cors(config: &CorsConfig) -> CorsLayer {
    let allow_any = config.allowed_origins.is_empty()
        || config.allowed_origins.iter().any(|origin| origin == "*");

    let allow_origin = if allow_any {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
            .collect();

        if origins.is_empty() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(origins)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("origin"),
        ])
        .expose_headers([HeaderName::from_static(headers::CONVERSATION_ID)])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
}
