// ABOUTME: Shared test utilities and fakes for integration tests
// ABOUTME: Provides auth, LLM, tool router and transport fakes plus an in-memory chat store
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `rube_chat_server`
//!
//! Every external collaborator has a fake here; the chat store is the real
//! SQLite implementation on an in-memory database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::Router;
use rube_chat_server::{
    auth::{extract_access_token, AuthProvider, AuthenticatedUser},
    config::ServerConfig,
    database::{ChatManager, ChatStore, ConversationRecord, Database, MessageRecord},
    errors::{AppError, AppResult},
    llm::{ChatRequest, ChatStream, LlmCapabilities, LlmProvider, MessageRole, StreamChunk, ToolCallDelta},
    resources::ServerResources,
    server::build_router,
    tools::{
        ToolCallOutput, ToolConnection, ToolDefinition, ToolRouter, ToolRouterSession,
        ToolTransport,
    },
};
use serde_json::{json, Value};

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Standard test database setup
pub async fn create_test_store() -> Arc<ChatManager> {
    init_test_logging();
    let database = Database::new("sqlite::memory:")
        .await
        .expect("in-memory database");
    Arc::new(database.chat_manager())
}

// ============================================================================
// Auth
// ============================================================================

/// Token of a user with an email
pub const USER_TOKEN: &str = "user-token";
/// Token of a second user with an email
pub const OTHER_USER_TOKEN: &str = "other-token";
/// Token of a user without an email
pub const NO_EMAIL_TOKEN: &str = "no-email-token";

/// Id behind [`USER_TOKEN`]
pub const USER_ID: &str = "user-1";
/// Id behind [`OTHER_USER_TOKEN`]
pub const OTHER_USER_ID: &str = "user-2";

/// Resolves the fixed test tokens
pub struct FakeAuthProvider;

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthenticatedUser> {
        let token = extract_access_token(headers).ok_or_else(AppError::auth_required)?;
        let user = match token.as_str() {
            USER_TOKEN => AuthenticatedUser {
                id: USER_ID.to_owned(),
                email: Some("user@example.com".to_owned()),
            },
            OTHER_USER_TOKEN => AuthenticatedUser {
                id: OTHER_USER_ID.to_owned(),
                email: Some("other@example.com".to_owned()),
            },
            NO_EMAIL_TOKEN => AuthenticatedUser {
                id: "user-3".to_owned(),
                email: None,
            },
            _ => return Err(AppError::auth_required()),
        };
        Ok(user)
    }
}

// ============================================================================
// LLM
// ============================================================================

/// Outcome of one scripted generation step
pub enum ScriptedStep {
    /// The request itself fails
    Fail(AppError),
    /// The stream yields these items in order
    Stream(Vec<Result<StreamChunk, AppError>>),
}

impl ScriptedStep {
    /// Step streaming text fragments then a stop marker
    pub fn text(fragments: &[&str]) -> Self {
        let mut items: Vec<Result<StreamChunk, AppError>> =
            fragments.iter().map(|f| Ok(StreamChunk::text(*f))).collect();
        items.push(Ok(StreamChunk::finished("stop")));
        Self::Stream(items)
    }

    /// Step issuing one tool call, optionally preceded by text
    pub fn tool_call(prefix: Option<&str>, id: &str, name: &str, args: &Value) -> Self {
        let mut items = Vec::new();
        if let Some(text) = prefix {
            items.push(Ok(StreamChunk::text(text)));
        }
        items.push(Ok(StreamChunk {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some(id.to_owned()),
                name: Some(name.to_owned()),
                arguments: args.to_string(),
            }],
            ..StreamChunk::default()
        }));
        items.push(Ok(StreamChunk::finished("tool_calls")));
        Self::Stream(items)
    }
}

/// Plays back scripted steps and records every request
pub struct ScriptedLlmProvider {
    steps: Mutex<VecDeque<ScriptedStep>>,
    requests: Mutex<Vec<ChatRequest>>,
    capabilities: LlmCapabilities,
}

impl ScriptedLlmProvider {
    /// Tool-calling provider answering with `steps` in order
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self::with_capabilities(steps, LlmCapabilities::tool_calling())
    }

    /// Provider with explicit capability flags
    pub fn with_capabilities(steps: Vec<ScriptedStep>, capabilities: LlmCapabilities) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            capabilities,
        }
    }

    /// Queue another step
    pub fn push(&self, step: ScriptedStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    /// Number of generation requests received
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlmProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> LlmCapabilities {
        self.capabilities
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedStep::text(&[]));

        match step {
            ScriptedStep::Fail(e) => Err(e),
            ScriptedStep::Stream(items) => Ok(Box::pin(futures_util::stream::iter(items))),
        }
    }
}

// ============================================================================
// Tool routing
// ============================================================================

/// Counts session creations; can be told to fail or to stall
#[derive(Default)]
pub struct CountingToolRouter {
    created: AtomicUsize,
    fail_next: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl CountingToolRouter {
    /// Sessions created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Make the next creation fail
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Stall every creation by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ToolRouter for CountingToolRouter {
    async fn create_session(
        &self,
        user_email: &str,
        _toolkits: &[String],
    ) -> AppResult<ToolRouterSession> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AppError::tool_session("router unavailable"));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolRouterSession {
            url: format!("http://tools.invalid/{user_email}/{n}"),
            session_id: format!("session-{n}"),
        })
    }
}

/// Connection bookkeeping shared between a transport and its connections
#[derive(Default)]
pub struct ConnectionLog {
    /// Connections opened
    pub connects: AtomicUsize,
    /// Connections closed
    pub closes: AtomicUsize,
    /// Tool calls as `name args`
    pub calls: Mutex<Vec<String>>,
}

impl ConnectionLog {
    /// Connections closed so far
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Connections opened so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Tool calls so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Opens [`FakeToolConnection`]s
pub struct FakeToolTransport {
    /// Shared bookkeeping
    pub log: Arc<ConnectionLog>,
}

impl FakeToolTransport {
    /// Transport recording into a fresh log
    pub fn new() -> Self {
        Self {
            log: Arc::new(ConnectionLog::default()),
        }
    }
}

#[async_trait]
impl ToolTransport for FakeToolTransport {
    async fn connect(&self, _session: &ToolRouterSession) -> AppResult<Arc<dyn ToolConnection>> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeToolConnection {
            log: Arc::clone(&self.log),
        }))
    }
}

/// Exposes one email tool
pub struct FakeToolConnection {
    log: Arc<ConnectionLog>,
}

#[async_trait]
impl ToolConnection for FakeToolConnection {
    async fn list_tools(&self) -> AppResult<Vec<ToolDefinition>> {
        Ok(vec![ToolDefinition {
            name: "GMAIL_FETCH_EMAILS".to_owned(),
            description: "Fetch recent emails".to_owned(),
            input_schema: json!({"type": "object", "properties": {"max_results": {"type": "integer"}}}),
        }])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> AppResult<ToolCallOutput> {
        self.log.calls.lock().unwrap().push(format!("{name} {arguments}"));
        if name == "GMAIL_FETCH_EMAILS" {
            Ok(ToolCallOutput {
                content: "3 unread emails".to_owned(),
                is_error: false,
            })
        } else {
            Err(AppError::tool_session(format!("unknown tool {name}")))
        }
    }

    async fn close(&self) -> AppResult<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Store wrappers
// ============================================================================

/// Delegates to a real store but can fail chosen operations
pub struct FailingStore {
    inner: Arc<ChatManager>,
    /// Fail conversation creation
    pub fail_create: AtomicBool,
    /// Fail appends of this role
    pub fail_role: Mutex<Option<MessageRole>>,
}

impl FailingStore {
    /// Wrap a store; nothing fails until configured
    pub fn new(inner: Arc<ChatManager>) -> Self {
        Self {
            inner,
            fail_create: AtomicBool::new(false),
            fail_role: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChatStore for FailingStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> AppResult<ConversationRecord> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::database("disk full"));
        }
        self.inner.create_conversation(user_id, title).await
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
        role: MessageRole,
    ) -> AppResult<MessageRecord> {
        let fail_role = *self.fail_role.lock().unwrap();
        if fail_role == Some(role) {
            return Err(AppError::database("disk full"));
        }
        self.inner
            .add_message(conversation_id, user_id, content, role)
            .await
    }

    async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        self.inner.list_messages(conversation_id).await
    }

    async fn list_conversations(&self, user_id: &str) -> AppResult<Vec<ConversationRecord>> {
        self.inner.list_conversations(user_id).await
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        self.inner.get_conversation(conversation_id, user_id).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Configuration used by every harness: no background sweep
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.session_cache.enable_background_cleanup = false;
    config.llm.model = "test-model".to_owned();
    config.llm.system_prompt = Some("You are a test assistant.".to_owned());
    config
}

/// Fully wired server over fakes
pub struct TestHarness {
    /// Shared resources
    pub resources: Arc<ServerResources>,
    /// Underlying SQLite store
    pub store: Arc<ChatManager>,
    /// Scripted model
    pub llm: Arc<ScriptedLlmProvider>,
    /// Session router
    pub router: Arc<CountingToolRouter>,
    /// Connection bookkeeping
    pub connections: Arc<ConnectionLog>,
}

impl TestHarness {
    /// Harness over the real store
    pub async fn new(steps: Vec<ScriptedStep>) -> Self {
        let store = create_test_store().await;
        let chat_store: Arc<dyn ChatStore> = store.clone();
        Self::with_store(steps, store, chat_store, test_config())
    }

    /// Harness whose model cannot call functions
    pub async fn text_only(steps: Vec<ScriptedStep>) -> Self {
        let store = create_test_store().await;
        let chat_store: Arc<dyn ChatStore> = store.clone();
        let llm = ScriptedLlmProvider::with_capabilities(steps, LlmCapabilities::text_only());
        Self::build(llm, store, chat_store, test_config())
    }

    /// Harness with an explicit store and configuration
    pub fn with_store(
        steps: Vec<ScriptedStep>,
        store: Arc<ChatManager>,
        chat_store: Arc<dyn ChatStore>,
        config: ServerConfig,
    ) -> Self {
        Self::build(ScriptedLlmProvider::new(steps), store, chat_store, config)
    }

    fn build(
        llm: ScriptedLlmProvider,
        store: Arc<ChatManager>,
        chat_store: Arc<dyn ChatStore>,
        config: ServerConfig,
    ) -> Self {
        let llm = Arc::new(llm);
        let router = Arc::new(CountingToolRouter::default());
        let transport = FakeToolTransport::new();
        let connections = Arc::clone(&transport.log);

        let resources = Arc::new(ServerResources::new(
            config,
            Arc::new(FakeAuthProvider),
            chat_store,
            llm.clone(),
            router.clone(),
            Arc::new(transport),
        ));

        Self {
            resources,
            store,
            llm,
            router,
            connections,
        }
    }

    /// Router over the harness resources
    pub fn app(&self) -> Router {
        build_router(Arc::clone(&self.resources))
    }
}

/// Chat body with a single user message
pub fn chat_body(content: &str, conversation_id: Option<&str>) -> Value {
    let mut body = json!({
        "messages": [{"role": "user", "content": content}]
    });
    if let Some(id) = conversation_id {
        body["conversationId"] = json!(id);
    }
    body
}
