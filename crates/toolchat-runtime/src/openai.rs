//! OpenAI-compatible LLM Provider
//!
//! Streams `/chat/completions` over server-sent events. The same wire format
//! serves OpenAI, Groq and Azure OpenAI; only the URL and auth header differ.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use toolchat_core::{
    error::{AgentError, Result},
    message::Message,
    provider::{CompletionStream, GenerationOptions, LlmProvider, StreamChunk},
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// How the API key travels with the request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure)
    ApiKeyHeader,
}

/// Where and how to reach an OpenAI-compatible endpoint
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Name used in logs and health output
    pub name: String,

    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    pub api_key: String,

    pub auth: AuthStyle,

    /// Azure deployments route by model name and require an API version
    pub azure_api_version: Option<String>,
}

impl OpenAiConfig {
    /// OpenAI proper, keyed by `OPENAI_API_KEY`
    pub fn openai_from_env() -> Result<Self> {
        Ok(Self {
            name: "openai".into(),
            base_url: OPENAI_BASE_URL.into(),
            api_key: required_env("OPENAI_API_KEY")?,
            auth: AuthStyle::Bearer,
            azure_api_version: None,
        })
    }

    /// Groq's OpenAI-compatible endpoint, keyed by `GROQ_API_KEY`
    pub fn groq_from_env() -> Result<Self> {
        Ok(Self {
            name: "groq".into(),
            base_url: GROQ_BASE_URL.into(),
            api_key: required_env("GROQ_API_KEY")?,
            auth: AuthStyle::Bearer,
            azure_api_version: None,
        })
    }

    /// Azure OpenAI, from `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_API_KEY`
    /// and optionally `AZURE_OPENAI_API_VERSION`
    pub fn azure_from_env() -> Result<Self> {
        let version = std::env::var("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|_| DEFAULT_AZURE_API_VERSION.into());

        Ok(Self {
            name: "azure".into(),
            base_url: required_env("AZURE_OPENAI_ENDPOINT")?,
            api_key: required_env("AZURE_OPENAI_API_KEY")?,
            auth: AuthStyle::ApiKeyHeader,
            azure_api_version: Some(version),
        })
    }

    fn completions_url(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        match &self.azure_api_version {
            Some(version) => format!(
                "{base}/openai/deployments/{model}/chat/completions?api-version={version}"
            ),
            None => format!("{base}/chat/completions"),
        }
    }

    fn models_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match &self.azure_api_version {
            Some(version) => format!("{base}/openai/models?api-version={version}"),
            None => format!("{base}/models"),
        }
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AgentError::Config(format!("{key} is not set")))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChunkData {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

fn api_error_message(event: &serde_json::Value) -> Option<String> {
    let error = event.get("error")?;
    if let Some(message) = error.get("message").and_then(serde_json::Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".into())
}

/// Parse the `data:` payload of one SSE event.
///
/// `[DONE]` ends the stream. Events without a content delta (role-only
/// openers, Azure content-filter preambles) yield `None`.
fn parse_sse_data(data: &str) -> Result<Option<StreamChunk>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(StreamChunk::done()));
    }

    let event: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| AgentError::Provider(format!("SSE parsing error: {e}, data: {data}")))?;

    if let Some(message) = api_error_message(&event) {
        return Err(AgentError::Provider(message));
    }

    let chunk: ChunkData = serde_json::from_value(event)
        .map_err(|e| AgentError::Provider(format!("SSE data schema error: {e}")))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(StreamChunk::text))
}

/// Decode an SSE byte stream into completion chunks.
///
/// A body that ends before `[DONE]` (or an error) yields a trailing
/// `Provider` error so a cut-off reply is never taken as complete.
fn sse_chunks<S, B, E>(bytes: S) -> CompletionStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    bytes
        .eventsource()
        .filter_map(|event| async move {
            match event {
                Ok(event) => parse_sse_data(&event.data).transpose(),
                Err(e) => Some(Err(AgentError::Provider(format!("SSE stream error: {e}")))),
            }
        })
        .map(Some)
        .chain(stream::once(future::ready(None)))
        .scan(false, |settled, item| {
            let item = match item {
                Some(Ok(chunk)) => {
                    *settled |= chunk.done;
                    Some(Ok(chunk))
                }
                Some(Err(e)) => {
                    *settled = true;
                    Some(Err(e))
                }
                None if *settled => None,
                None => Some(Err(AgentError::Provider("stream ended before [DONE]".into()))),
            };
            future::ready(Some(item))
        })
        .filter_map(future::ready)
        .boxed()
}

/// OpenAI-compatible streaming provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn from_config(config: OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn openai_from_env() -> Result<Self> {
        OpenAiConfig::openai_from_env().map(Self::from_config)
    }

    pub fn groq_from_env() -> Result<Self> {
        OpenAiConfig::groq_from_env().map(Self::from_config)
    }

    pub fn azure_from_env() -> Result<Self> {
        OpenAiConfig::azure_from_env().map(Self::from_config)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.auth {
            AuthStyle::Bearer => request.bearer_auth(&self.config.api_key),
            AuthStyle::ApiKeyHeader => request.header("api-key", &self.config.api_key),
        }
    }

    fn build_request<'a>(messages: &'a [Message], options: &'a GenerationOptions) -> ChatRequest<'a> {
        ChatRequest {
            model: &options.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn health_check(&self) -> Result<bool> {
        let request = self.authorize(self.client.get(self.config.models_url()));
        match request.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!(provider = %self.config.name, "Health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let url = self.config.completions_url(&options.model);
        let body = Self::build_request(messages, options);

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!(
                "{} returned {status}: {body}",
                self.config.name
            )));
        }

        tracing::debug!(provider = %self.config.name, model = %options.model, "SSE stream opened");
        Ok(sse_chunks(response.bytes_stream()))
    }
}
