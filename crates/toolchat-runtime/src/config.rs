//! Runtime configuration
//!
//! Everything the binaries need, read from the environment. Call
//! `dotenvy::dotenv()` first if a `.env` file should be honoured.

use toolchat_core::dispatch::SchemaPolicy;
use toolchat_core::error::{AgentError, Result};
use toolchat_core::provider::GenerationOptions;
use toolchat_core::session::SessionConfig;

use crate::factory::{DEFAULT_PROVIDER, ProviderKind};
use crate::mcp::McpServerConfig;

/// Runtime configuration shared by the server and the CLI
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// How to launch the MCP tool server
    pub mcp: McpServerConfig,

    /// Backend used when the caller does not pick one
    pub provider: ProviderKind,

    /// Model override; the provider's default otherwise
    pub model: Option<String>,

    pub temperature: f32,

    pub max_tool_round_trips: usize,

    pub schema_policy: SchemaPolicy,

    /// Listen address for the HTTP server
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mcp: McpServerConfig::default(),
            provider: DEFAULT_PROVIDER,
            model: None,
            temperature: 0.3,
            max_tool_round_trips: SessionConfig::default().max_tool_round_trips,
            schema_policy: SchemaPolicy::default(),
            bind_addr: "0.0.0.0:8000".into(),
        }
    }
}

impl RuntimeConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(command) = get("MCP_SERVER_COMMAND") {
            config.mcp = McpServerConfig::from_command_line(&command)?;
        }
        if let Some(provider) = get("TOOLCHAT_PROVIDER") {
            config.provider = provider.parse()?;
        }
        config.model = get("TOOLCHAT_MODEL");
        if let Some(temperature) = get("TOOLCHAT_TEMPERATURE") {
            config.temperature = parse_value("TOOLCHAT_TEMPERATURE", &temperature)?;
        }
        if let Some(max) = get("TOOLCHAT_MAX_TOOL_ROUND_TRIPS") {
            config.max_tool_round_trips = parse_value("TOOLCHAT_MAX_TOOL_ROUND_TRIPS", &max)?;
        }
        if let Some(flag) = get("TOOLCHAT_REQUIRE_SCHEMA_FIRST") {
            if parse_flag("TOOLCHAT_REQUIRE_SCHEMA_FIRST", &flag)? {
                config.schema_policy = SchemaPolicy::RequireSchemaFirst;
            }
        }
        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }

        Ok(config)
    }

    /// Model to use with the configured provider
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Session settings for a given model
    pub fn session_config(&self, model: impl Into<String>) -> SessionConfig {
        SessionConfig {
            generation: GenerationOptions {
                model: model.into(),
                temperature: self.temperature,
                max_tokens: None,
            },
            max_tool_round_trips: self.max_tool_round_trips,
            schema_policy: self.schema_policy,
        }
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AgentError::Config(format!("invalid {key} '{value}': {e}")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AgentError::Config(format!("invalid {key} '{value}'"))),
    }
}
