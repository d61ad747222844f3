//! # toolchat-runtime
//!
//! Concrete collaborators for `toolchat-core`.
//!
//! ## Providers
//!
//! - **Ollama**: local inference through `ollama-rs`
//! - **OpenAI-compatible**: OpenAI, Groq and Azure OpenAI over SSE
//!
//! ## Tool registry
//!
//! - **MCP stdio**: a tool server spawned as a child process
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolchat_runtime::{create_provider, McpStdioClient, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_env()?;
//! let registry = Arc::new(McpStdioClient::connect(&config.mcp).await?);
//! let session = ChatSession::builder()
//!     .provider(create_provider(config.provider)?)
//!     .registry(registry)
//!     .config(config.session_config(config.model()))
//!     .build()
//!     .await?;
//! ```

pub mod config;
pub mod factory;
pub mod mcp;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use config::RuntimeConfig;
pub use factory::{create_provider, parse_model_string, ProviderKind};
pub use mcp::{McpServerConfig, McpStdioClient};

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

// Re-export core types for convenience
pub use toolchat_core::{
    AgentError, ChatSession, LlmProvider, Message, Result, Role, SessionConfig,
    ToolRegistryClient,
};
