//! Test doubles: a scripted streaming provider and a counting registry.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{CompletionStream, GenerationOptions, LlmProvider, StreamChunk};
use crate::registry::{ToolRegistryClient, ToolSchema};

/// One scripted model reply
pub enum Script {
    /// Emit these chunks, then end the stream
    Reply(Vec<String>),
    /// Emit these chunks, then fail mid-stream
    FailAfter(Vec<String>),
    /// Emit these chunks, then never finish
    Hang(Vec<String>),
}

impl Script {
    pub fn reply(chunks: &[&str]) -> Self {
        Self::Reply(chunks.iter().map(ToString::to_string).collect())
    }

    pub fn fail_after(chunks: &[&str]) -> Self {
        Self::FailAfter(chunks.iter().map(ToString::to_string).collect())
    }

    pub fn hang(chunks: &[&str]) -> Self {
        Self::Hang(chunks.iter().map(ToString::to_string).collect())
    }
}

/// Provider that plays back one `Script` per `complete_stream` call
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    seen: Mutex<Vec<usize>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// History length observed by each stream request, in order
    pub fn history_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

fn chunks(texts: Vec<String>) -> Vec<Result<StreamChunk>> {
    texts.into_iter().map(|t| Ok(StreamChunk::text(t))).collect()
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        self.seen.lock().unwrap().push(messages.len());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Provider("script exhausted".into()))?;

        let stream: CompletionStream = match script {
            Script::Reply(texts) => {
                let mut items = chunks(texts);
                items.push(Ok(StreamChunk::done()));
                futures::stream::iter(items).boxed()
            }
            Script::FailAfter(texts) => {
                let mut items = chunks(texts);
                items.push(Err(AgentError::Provider("connection reset".into())));
                futures::stream::iter(items).boxed()
            }
            Script::Hang(texts) => futures::stream::iter(chunks(texts))
                .chain(futures::stream::pending())
                .boxed(),
        };
        Ok(stream)
    }
}

/// Registry hosting a single `add` tool, counting every round-trip
#[derive(Default)]
pub struct FakeRegistry {
    schema_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    closes: AtomicUsize,
    fail_execution: bool,
    broken_transport: bool,
}

impl FakeRegistry {
    pub fn with_add() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_execution(mut self) -> Self {
        self.fail_execution = true;
        self
    }

    #[must_use]
    pub fn broken_transport(mut self) -> Self {
        self.broken_transport = true;
        self
    }

    pub fn add_schema() -> ToolSchema {
        ToolSchema {
            name: "add".into(),
            description: "Add two numbers".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "a": {"type": "integer"},
                    "b": {"type": "integer"}
                },
                "required": ["a", "b"]
            }),
        }
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn check_transport(&self) -> Result<()> {
        if self.broken_transport {
            return Err(AgentError::Transport("broken pipe".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolRegistryClient for FakeRegistry {
    async fn list_tool_names(&self) -> Result<Vec<String>> {
        self.check_transport()?;
        Ok(vec!["add".into()])
    }

    async fn get_tool_schema(&self, name: &str) -> Result<ToolSchema> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.check_transport()?;
        if name == "add" {
            Ok(Self::add_schema())
        } else {
            Err(AgentError::UnknownTool(name.into()))
        }
    }

    async fn execute_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.check_transport()?;
        if name != "add" {
            return Err(AgentError::UnknownTool(name.into()));
        }
        if self.fail_execution {
            return Err(AgentError::ToolExecution("add exploded".into()));
        }
        let a = arguments.get("a").and_then(Value::as_i64).unwrap_or(0);
        let b = arguments.get("b").and_then(Value::as_i64).unwrap_or(0);
        Ok(json!([(a + b).to_string()]))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
