//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error (request rejected, stream broke mid-emission)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool registry process could not be started or handshaked
    #[error("Connection error: {0}")]
    Connection(String),

    /// Tool registry wire failure after the connection was established
    #[error("Transport error: {0}")]
    Transport(String),

    /// Tool not registered with the registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The remote tool itself failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Too many consecutive tool round-trips in one turn
    #[error("Tool loop exceeded: more than {0} tool round-trips in one turn")]
    ToolLoopExceeded(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Errors the model can see and recover from.
    ///
    /// These are folded into the conversation as system messages; everything
    /// else aborts the current turn.
    pub const fn is_tool_level(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::ToolExecution(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::Connection(_) | Self::Transport(_) => {
                "The tool service is unreachable. Please try again later.".into()
            }
            Self::UnknownTool(name) => format!("The tool '{name}' is not available."),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::ToolLoopExceeded(_) => {
                "The request needed too many tool calls. Please try a simpler query.".into()
            }
            Self::Config(msg) => format!("Configuration error: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
