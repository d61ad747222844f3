//! MCP Tool Registry Client
//!
//! `ToolRegistryClient` over the Model Context Protocol's stdio transport:
//! newline-delimited JSON-RPC 2.0 exchanged with a child process.
//!
//! A background task reads responses and hands each one to the waiter
//! registered under its request id, so any number of sessions can share one
//! client. Every request line is written under a single lock on stdin.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use toolchat_core::error::{AgentError, Result};
use toolchat_core::registry::{ToolRegistryClient, ToolSchema};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// How to launch the tool server
#[derive(Clone, Debug)]
pub struct McpServerConfig {
    /// Executable to spawn
    pub command: String,

    /// Command-line arguments
    pub args: Vec<String>,

    /// Extra environment variables for the child
    pub env: HashMap<String, String>,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            command: "uv".into(),
            args: ["run", "--with", "mcp[cli]", "mcp", "run", "main.py"]
                .into_iter()
                .map(String::from)
                .collect(),
            env: HashMap::new(),
        }
    }
}

impl McpServerConfig {
    /// Parse a whitespace-separated command line such as `python server.py`
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let command = parts
            .next()
            .ok_or_else(|| AgentError::Config("MCP server command is empty".into()))?;

        Ok(Self {
            command,
            args: parts.collect(),
            env: HashMap::new(),
        })
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolsPage {
    tools: Vec<McpTool>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    input_schema: Value,
}

impl From<McpTool> for ToolSchema {
    fn from(tool: McpTool) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            parameters: tool.input_schema,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// MCP client speaking to a tool server over stdio
pub struct McpStdioClient {
    writer: Mutex<Option<Writer>>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    pending: PendingRequests,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl McpStdioClient {
    /// Spawn the tool server and complete the MCP handshake
    pub async fn connect(config: &McpServerConfig) -> Result<Self> {
        tracing::info!(command = %config.command, args = ?config.args, "Starting MCP server");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::Connection(format!("failed to start '{}': {e}", config.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Connection("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Connection("child stdout unavailable".into()))?;

        let client = Self::from_io(stdout, stdin);
        *client.child.lock().await = Some(child);

        client.handshake().await
    }

    /// Run `initialize`, closing the client when the server rejects or drops it
    pub async fn handshake(self) -> Result<Self> {
        if let Err(e) = self.initialize().await {
            self.close().await?;
            return Err(AgentError::Connection(format!("MCP handshake failed: {e}")));
        }

        tracing::info!("Connected to MCP server");
        Ok(self)
    }

    /// Build a client over an existing byte transport. No handshake is sent.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = PendingRequests::default();
        let closed = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(read_responses(reader, pending.clone(), closed.clone()));
        let writer: Writer = Box::new(writer);

        Self {
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(None),
            reader: Mutex::new(Some(handle)),
            pending,
            closed,
            next_id: AtomicU64::new(1),
        }
    }

    /// `initialize` request followed by the `initialized` notification
    pub async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "toolchat",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let info = self.request("initialize", Some(params)).await?.map_err(|e| {
            AgentError::Connection(format!("initialize rejected: {} ({})", e.message, e.code))
        })?;
        let server = info.get("serverInfo").cloned().unwrap_or_default();
        tracing::debug!(%server, "MCP initialized");

        self.notify("notifications/initialized").await
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self
                .request("tools/list", params)
                .await?
                .map_err(|e| AgentError::Transport(format!("tools/list failed: {}", e.message)))?;

            let page: ToolsPage = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
    }

    /// Send a request and wait for its response.
    ///
    /// The outer `Result` is the transport, the inner one the server's verdict.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<std::result::Result<Value, JsonRpcError>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(AgentError::Transport("tool server connection is closed".into()));
            }
            pending.insert(id, tx);
        }

        let line = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        })?;

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        tracing::debug!(id, method, "MCP request sent");

        let response = rx.await.map_err(|_| {
            AgentError::Transport(format!("tool server closed before answering '{method}'"))
        })?;

        Ok(match response.error {
            Some(error) => Err(error),
            None => Ok(response.result.unwrap_or(Value::Null)),
        })
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let line = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        })?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| AgentError::Transport("MCP client is closed".into()))?;

        let io = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        io.await
            .map_err(|e| AgentError::Transport(format!("write to tool server failed: {e}")))
    }
}

/// Route every response line to its waiter until the server hangs up.
async fn read_responses<R>(reader: R, pending: PendingRequests, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = LinesStream::new(BufReader::new(reader).lines());

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "MCP read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: JsonRpcResponse = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::trace!(error = %e, %line, "Ignoring non JSON-RPC line");
                continue;
            }
        };

        if let Some(method) = &message.method {
            tracing::debug!(%method, "MCP server message ignored");
            continue;
        }

        match message.id.as_ref().and_then(Value::as_u64) {
            Some(id) => match pending.lock().await.remove(&id) {
                Some(waiter) => {
                    let _ = waiter.send(message);
                }
                None => tracing::warn!(id, "Response for unknown MCP request"),
            },
            None => tracing::warn!("MCP response without a numeric id"),
        }
    }

    // Dropping the senders fails every outstanding request.
    let mut pending = pending.lock().await;
    closed.store(true, Ordering::SeqCst);
    pending.clear();
    tracing::debug!("MCP reader finished");
}

/// Flatten `tools/call` content the way the dispatcher expects it.
///
/// All-text content becomes a JSON array of strings; anything else is passed
/// through untouched.
fn unwrap_content(content: Vec<Value>) -> Value {
    let texts: Option<Vec<Value>> = content
        .iter()
        .map(|item| item.get("text").and_then(Value::as_str).map(|t| Value::String(t.into())))
        .collect();

    match texts {
        Some(texts) => Value::Array(texts),
        None => Value::Array(content),
    }
}

#[async_trait]
impl ToolRegistryClient for McpStdioClient {
    async fn list_tool_names(&self) -> Result<Vec<String>> {
        Ok(self.list_tools().await?.into_iter().map(|t| t.name).collect())
    }

    async fn get_tool_schema(&self, name: &str) -> Result<ToolSchema> {
        self.list_tools()
            .await?
            .into_iter()
            .find(|t| t.name == name)
            .map(ToolSchema::from)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    async fn execute_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let params = json!({ "name": name, "arguments": arguments });

        let result = match self.request("tools/call", Some(params)).await? {
            Ok(result) => result,
            Err(e) => {
                let known = self.list_tool_names().await?;
                if known.iter().any(|t| t == name) {
                    return Err(AgentError::ToolExecution(e.message));
                }
                return Err(AgentError::UnknownTool(name.to_string()));
            }
        };

        let call: CallToolResult = serde_json::from_value(result)?;
        let output = unwrap_content(call.content);

        if call.is_error {
            let detail = match &output {
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("\n"),
                other => other.to_string(),
            };
            return Err(AgentError::ToolExecution(detail));
        }
        Ok(output)
    }

    async fn close(&self) -> Result<()> {
        // Dropping stdin lets a well-behaved server exit on EOF.
        self.writer.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "MCP server already exited");
            }
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        let mut pending = self.pending.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        pending.clear();
        Ok(())
    }
}
