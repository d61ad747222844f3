//! Conversation State Machine
//!
//! A `ChatSession` owns one conversation: its message history, the tool
//! names it was created with and its schema cache. Each turn streams the
//! model's reply, looks for an embedded tool request, dispatches it to the
//! registry and re-queries the model until a reply carries no request.
//!
//! ```text
//!  Idle ──► Streaming ──► Extracting ──► Idle
//!              ▲              │
//!              └─ Dispatching ◄┘
//! ```

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::ops::DerefMut;
use std::sync::Arc;
use uuid::Uuid;

use crate::dispatch::{dispatch, SchemaPolicy};
use crate::error::{AgentError, Result};
use crate::extract::extract;
use crate::handler::{BufferingHandler, ChannelHandler, ResponseHandler, TurnChunk};
use crate::message::{Conversation, Message};
use crate::prompt::system_prompt;
use crate::provider::{GenerationOptions, LlmProvider};
use crate::registry::{SchemaCache, ToolRegistryClient};

/// Chunks buffered between a streamed turn and its consumer
const STREAM_BUFFER: usize = 32;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the current turn is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    /// No turn in flight
    Idle,
    /// Model producing tokens
    Streaming,
    /// Inspecting the finished reply for a tool request
    Extracting,
    /// Tool request in flight
    Dispatching,
}

/// Session configuration
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Generation options passed to the provider
    pub generation: GenerationOptions,

    /// Tool round-trips allowed in a single turn
    pub max_tool_round_trips: usize,

    /// Whether execute-requests need a prior schema-request
    pub schema_policy: SchemaPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            generation: GenerationOptions::default(),
            max_tool_round_trips: 10,
            schema_policy: SchemaPolicy::default(),
        }
    }
}

/// Lazy, single-use sequence of a turn's output
pub type TurnStream<'a> = BoxStream<'a, TurnChunk>;

/// One conversation with a streaming model and a tool registry
pub struct ChatSession {
    id: SessionId,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<dyn ToolRegistryClient>,
    tool_names: Vec<String>,
    conversation: Conversation,
    schemas: SchemaCache,
    config: SessionConfig,
    state: TurnState,
}

impl ChatSession {
    /// Create a session whose system prompt advertises `tool_names`
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<dyn ToolRegistryClient>,
        tool_names: Vec<String>,
        config: SessionConfig,
    ) -> Self {
        let conversation = Conversation::with_system_prompt(system_prompt(&tool_names));
        let id = SessionId::new();
        tracing::debug!(session = %id, tools = tool_names.len(), "Session created");

        Self {
            id,
            provider,
            registry,
            tool_names,
            conversation,
            schemas: SchemaCache::new(),
            config,
            state: TurnState::Idle,
        }
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    pub const fn schema_cache(&self) -> &SchemaCache {
        &self.schemas
    }

    pub const fn state(&self) -> TurnState {
        self.state
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one turn, collecting output, and return the final assistant text.
    pub async fn process_turn(&mut self, input: &str) -> Result<String> {
        let mut handler = BufferingHandler::new();
        self.run_turn(input, &mut handler).await
    }

    /// Run one turn, yielding output as it is produced.
    ///
    /// Dropping the stream early cancels the turn: the provider stream is
    /// released and the unfinished reply is never added to the history.
    pub fn stream_turn(&mut self, input: impl Into<String>) -> TurnStream<'_> {
        turn_stream(self, input.into())
    }

    /// Owned variant of [`stream_turn`](Self::stream_turn) for callers that
    /// need a `'static` stream, such as HTTP responses.
    pub fn into_turn_stream(self, input: impl Into<String>) -> TurnStream<'static> {
        turn_stream(Box::new(self), input.into())
    }

    /// Run one turn, pushing every chunk and any fatal error into `handler`.
    pub async fn run_turn(
        &mut self,
        input: &str,
        handler: &mut dyn ResponseHandler,
    ) -> Result<String> {
        let result = {
            let mut turn = ActiveTurn(&mut *self);
            turn.0.conversation.push(Message::user(input));
            turn.0.drive(handler).await
        };

        if let Err(e) = &result {
            tracing::warn!(session = %self.id, error = %e, "Turn aborted");
            handler.on_error(&e.to_string()).await;
        }
        result
    }

    /// Close the registry client. Sessions sharing it lose it too.
    pub async fn close(&self) -> Result<()> {
        self.registry.close().await
    }

    async fn drive(&mut self, handler: &mut dyn ResponseHandler) -> Result<String> {
        let mut round_trips = 0;

        loop {
            let reply = self.stream_reply(handler).await?;
            self.conversation.push(Message::assistant(reply.clone()));

            self.transition(TurnState::Extracting);
            let Some(request) = extract(&reply) else {
                return Ok(reply);
            };

            if round_trips >= self.config.max_tool_round_trips {
                return Err(AgentError::ToolLoopExceeded(self.config.max_tool_round_trips));
            }
            round_trips += 1;

            self.transition(TurnState::Dispatching);
            handler.on_tool_event(&request.describe()).await;
            let outcome = dispatch(
                request,
                self.registry.as_ref(),
                &mut self.schemas,
                self.config.schema_policy,
            )
            .await?;
            self.conversation.push(Message::system(outcome.message));

            if !outcome.continue_loop {
                return Ok(reply);
            }
        }
    }

    /// Stream one model reply. Nothing is recorded if the stream fails.
    async fn stream_reply(&mut self, handler: &mut dyn ResponseHandler) -> Result<String> {
        self.transition(TurnState::Streaming);

        let mut stream = self
            .provider
            .complete_stream(self.conversation.messages(), &self.config.generation)
            .await?;

        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !chunk.delta.is_empty() {
                handler.on_text_chunk(&chunk.delta).await;
                reply.push_str(&chunk.delta);
            }
            if chunk.done {
                break;
            }
        }
        Ok(reply)
    }

    fn transition(&mut self, next: TurnState) {
        tracing::debug!(session = %self.id, from = ?self.state, to = ?next, "Turn state");
        self.state = next;
    }
}

/// Puts the session back to `Idle` when a turn ends, including when the
/// turn's future is dropped mid-flight.
struct ActiveTurn<'a>(&'a mut ChatSession);

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        self.0.transition(TurnState::Idle);
    }
}

/// Drive a turn on `session` while forwarding its output through a bounded
/// channel; the returned stream polls both.
fn turn_stream<'a, S>(mut session: S, input: String) -> TurnStream<'a>
where
    S: DerefMut<Target = ChatSession> + Send + 'a,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    let driver = futures::stream::once(async move {
        let mut handler = ChannelHandler::new(tx);
        // Failures already reached the consumer through the handler.
        let _ = session.run_turn(&input, &mut handler).await;
    })
    .filter_map(|()| futures::future::ready(None::<TurnChunk>));

    futures::stream::select(rx, driver).boxed()
}

/// Builder for `ChatSession`
pub struct SessionBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    registry: Option<Arc<dyn ToolRegistryClient>>,
    tool_names: Option<Vec<String>>,
    config: SessionConfig,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            registry: None,
            tool_names: None,
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn ToolRegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Skip asking the registry for its tool names
    #[must_use]
    pub fn tool_names(mut self, names: Vec<String>) -> Self {
        self.tool_names = Some(names);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub fn max_tool_round_trips(mut self, max: usize) -> Self {
        self.config.max_tool_round_trips = max;
        self
    }

    #[must_use]
    pub fn schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.config.schema_policy = policy;
        self
    }

    pub async fn build(self) -> Result<ChatSession> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let registry = self
            .registry
            .ok_or_else(|| AgentError::Config("Tool registry is required".into()))?;

        let tool_names = match self.tool_names {
            Some(names) => names,
            None => registry.list_tool_names().await?,
        };

        Ok(ChatSession::new(provider, registry, tool_names, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::testing::{FakeRegistry, Script, ScriptedProvider};

    const SCHEMA_REQ: &str = r#"{"tool_request": "schema", "tool_name": "add"}"#;
    const EXECUTE_REQ: &str =
        r#"{"tool_request": "execute", "tool_name": "add", "arguments": {"a": 2, "b": 3}}"#;

    fn session(
        scripts: Vec<Script>,
        registry: FakeRegistry,
    ) -> (ChatSession, Arc<ScriptedProvider>, Arc<FakeRegistry>) {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let registry = Arc::new(registry);
        let session = ChatSession::new(
            provider.clone(),
            registry.clone(),
            vec!["add".into()],
            SessionConfig::default(),
        );
        (session, provider, registry)
    }

    fn roles(session: &ChatSession) -> Vec<Role> {
        session.conversation().messages().iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_plain_answer_ends_turn() {
        let (mut session, provider, _) =
            session(vec![Script::reply(&["Hello", ", ", "there!"])], FakeRegistry::with_add());

        let answer = session.process_turn("hi").await.unwrap();

        assert_eq!(answer, "Hello, there!");
        assert_eq!(provider.calls(), 1);
        assert_eq!(roles(&session), vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_schema_then_execute_then_answer() {
        let (mut session, provider, registry) = session(
            vec![
                Script::reply(&[SCHEMA_REQ]),
                Script::reply(&[EXECUTE_REQ]),
                Script::reply(&["2 + 3 = 5"]),
            ],
            FakeRegistry::with_add(),
        );

        let answer = session.process_turn("what is 2 + 3?").await.unwrap();

        assert_eq!(answer, "2 + 3 = 5");
        assert_eq!(
            roles(&session),
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::System,
                Role::Assistant,
                Role::System,
                Role::Assistant,
            ]
        );

        let messages = session.conversation().messages();
        assert!(messages[3].content.starts_with("Use the following schema for tool 'add':"));
        assert!(messages[5].content.starts_with("This is the result of executing 'add':"));
        assert!(messages[5].content.contains('5'));
        assert_eq!(provider.history_lengths(), vec![2, 4, 6]);
        assert_eq!(registry.execute_calls(), 1);
    }

    #[tokio::test]
    async fn test_schema_fetched_once_per_session() {
        let (mut session, _, registry) = session(
            vec![
                Script::reply(&[SCHEMA_REQ]),
                Script::reply(&["ok"]),
                Script::reply(&["again: ", SCHEMA_REQ]),
                Script::reply(&["ok"]),
            ],
            FakeRegistry::with_add(),
        );

        session.process_turn("first").await.unwrap();
        session.process_turn("second").await.unwrap();

        assert_eq!(registry.schema_calls(), 1);
        assert_eq!(session.schema_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_execution_failure_is_fed_back() {
        let (mut session, provider, _) = session(
            vec![Script::reply(&[EXECUTE_REQ]), Script::reply(&["Sorry, that failed."])],
            FakeRegistry::with_add().failing_execution(),
        );

        let answer = session.process_turn("add 2 and 3").await.unwrap();

        assert_eq!(answer, "Sorry, that failed.");
        assert_eq!(provider.calls(), 2);
        let messages = session.conversation().messages();
        assert_eq!(messages[3].role, Role::System);
        assert!(messages[3].content.starts_with("Error executing tool:"));
    }

    #[tokio::test]
    async fn test_malformed_request_is_fed_back() {
        let (mut session, provider, _) = session(
            vec![
                Script::reply(&[r#"{"tool_request": "execute", "tool_name": "add"}"#]),
                Script::reply(&["I need more details."]),
            ],
            FakeRegistry::with_add(),
        );

        session.process_turn("add").await.unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(
            session.conversation().messages()[3].content,
            "Error executing tool: missing 'arguments'"
        );
    }

    #[tokio::test]
    async fn test_stream_failure_discards_partial_reply() {
        let (mut session, _, _) =
            session(vec![Script::fail_after(&["partial "])], FakeRegistry::with_add());

        let mut handler = BufferingHandler::new();
        let err = session.run_turn("hi", &mut handler).await.unwrap_err();

        assert!(matches!(err, AgentError::Provider(_)));
        assert_eq!(roles(&session), vec![Role::System, Role::User]);
        assert!(handler.content().starts_with("partial Error: "));
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_session_survives_failed_turn() {
        let (mut session, _, _) = session(
            vec![Script::fail_after(&[]), Script::reply(&["back online"])],
            FakeRegistry::with_add(),
        );

        assert!(session.process_turn("one").await.is_err());
        let answer = session.process_turn("two").await.unwrap();

        assert_eq!(answer, "back online");
        assert_eq!(
            roles(&session),
            vec![Role::System, Role::User, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_registry_transport_failure_aborts_turn() {
        let (mut session, provider, _) = session(
            vec![Script::reply(&[SCHEMA_REQ]), Script::reply(&["unreachable"])],
            FakeRegistry::with_add().broken_transport(),
        );

        let err = session.process_turn("hi").await.unwrap_err();

        assert!(matches!(err, AgentError::Transport(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_loop_ceiling() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::reply(&[SCHEMA_REQ]),
            Script::reply(&[SCHEMA_REQ]),
            Script::reply(&[SCHEMA_REQ]),
            Script::reply(&["never reached"]),
        ]));
        let mut session = ChatSession::builder()
            .provider(provider.clone())
            .registry(Arc::new(FakeRegistry::with_add()))
            .max_tool_round_trips(2)
            .build()
            .await
            .unwrap();

        let err = session.process_turn("loop").await.unwrap_err();

        assert!(matches!(err, AgentError::ToolLoopExceeded(2)));
        assert_eq!(provider.calls(), 3);
        assert_eq!(session.conversation().len(), 7);
    }

    #[tokio::test]
    async fn test_stream_turn_yields_in_order() {
        let (mut session, _, _) = session(
            vec![Script::reply(&[EXECUTE_REQ]), Script::reply(&["The ", "sum ", "is 5."])],
            FakeRegistry::with_add(),
        );

        let chunks: Vec<_> = session.stream_turn("add 2 and 3").collect().await;

        assert_eq!(
            chunks,
            vec![
                TurnChunk::Text(EXECUTE_REQ.into()),
                TurnChunk::Text("The ".into()),
                TurnChunk::Text("sum ".into()),
                TurnChunk::Text("is 5.".into()),
            ]
        );
        assert_eq!(session.conversation().len(), 5);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_stream_turn_surfaces_error() {
        let (mut session, _, _) =
            session(vec![Script::fail_after(&["par"])], FakeRegistry::with_add());

        let chunks: Vec<_> = session.stream_turn("hi").collect().await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], TurnChunk::Text("par".into()));
        assert!(matches!(chunks[1], TurnChunk::Error(_)));
        assert_eq!(session.conversation().len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_stream_appends_nothing() {
        let (mut session, _, _) =
            session(vec![Script::hang(&["still ", "typing"])], FakeRegistry::with_add());

        {
            let mut stream = session.stream_turn("hi");
            assert_eq!(stream.next().await, Some(TurnChunk::Text("still ".into())));
        }

        assert_eq!(roles(&session), vec![Role::System, Role::User]);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_turn_leaves_session_idle_and_usable() {
        let (mut session, _, _) = session(
            vec![Script::hang(&["thinking"]), Script::reply(&["back again"])],
            FakeRegistry::with_add(),
        );

        let mut handler = BufferingHandler::new();
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            session.run_turn("hi", &mut handler),
        )
        .await;

        assert!(cancelled.is_err());
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(roles(&session), vec![Role::System, Role::User]);

        let answer = session.process_turn("still there?").await.unwrap();
        assert_eq!(answer, "back again");
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Vec<String>,
    }

    #[async_trait::async_trait]
    impl ResponseHandler for RecordingHandler {
        async fn on_text_chunk(&mut self, _text: &str) {}

        async fn on_error(&mut self, _message: &str) {}

        async fn on_tool_event(&mut self, event: &str) {
            self.events.push(event.to_string());
        }
    }

    #[tokio::test]
    async fn test_tool_activity_reaches_handler() {
        let (mut session, _, _) = session(
            vec![
                Script::reply(&[SCHEMA_REQ]),
                Script::reply(&[EXECUTE_REQ]),
                Script::reply(&["2 + 3 = 5"]),
            ],
            FakeRegistry::with_add(),
        );

        let mut handler = RecordingHandler::default();
        session.run_turn("add 2 and 3", &mut handler).await.unwrap();

        assert_eq!(handler.events, vec!["Schema for add", "Execution of add"]);
    }

    #[tokio::test]
    async fn test_owned_stream() {
        let (session, _, _) = session(vec![Script::reply(&["ok"])], FakeRegistry::with_add());

        let chunks: Vec<_> = session.into_turn_stream("hi").collect().await;

        assert_eq!(chunks, vec![TurnChunk::Text("ok".into())]);
    }

    #[tokio::test]
    async fn test_builder_lists_tools_and_requires_provider() {
        let registry = Arc::new(FakeRegistry::with_add());

        let err = ChatSession::builder()
            .registry(registry.clone())
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Config(_)));

        let session = ChatSession::builder()
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .registry(registry.clone())
            .build()
            .await
            .unwrap();
        assert_eq!(session.tool_names(), ["add".to_string()]);
        assert!(session.conversation().messages()[0].content.contains("\"add\""));

        session.close().await.unwrap();
        assert_eq!(registry.closes(), 1);
    }
}
