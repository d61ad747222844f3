//! Provider factory
//!
//! Maps a `"<provider>/<model>"` string onto a concrete `LlmProvider`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use toolchat_core::error::{AgentError, Result};
use toolchat_core::provider::LlmProvider;

/// Provider used when a model string carries no `provider/` prefix
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Groq;

/// Supported LLM backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Groq,
    Azure,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Azure => "azure",
        }
    }

    /// Model used when none is configured
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "gemma3",
            Self::OpenAi | Self::Azure => "gpt-4o",
            Self::Groq => "llama-3.3-70b-versatile",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            "azure" | "azure-openai" | "azure_openai" => Ok(Self::Azure),
            other => Err(AgentError::Config(format!("Unsupported provider: {other}"))),
        }
    }
}

/// Split `"<provider>/<model>"` at the first slash.
///
/// Without a slash the whole string is the model name and the provider is
/// `DEFAULT_PROVIDER`. The model part may itself contain slashes.
pub fn parse_model_string(model: &str) -> Result<(ProviderKind, String)> {
    match model.split_once('/') {
        Some((provider, name)) => Ok((provider.parse()?, name.to_string())),
        None => Ok((DEFAULT_PROVIDER, model.to_string())),
    }
}

/// Build a provider of the given kind from environment variables
pub fn create_provider(kind: ProviderKind) -> Result<Arc<dyn LlmProvider>> {
    tracing::debug!(provider = %kind, "Creating LLM provider");

    match kind {
        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => Ok(Arc::new(crate::ollama::OllamaProvider::from_env()?)),

        #[cfg(feature = "openai")]
        ProviderKind::OpenAi => Ok(Arc::new(crate::openai::OpenAiProvider::openai_from_env()?)),

        #[cfg(feature = "openai")]
        ProviderKind::Groq => Ok(Arc::new(crate::openai::OpenAiProvider::groq_from_env()?)),

        #[cfg(feature = "openai")]
        ProviderKind::Azure => Ok(Arc::new(crate::openai::OpenAiProvider::azure_from_env()?)),

        #[allow(unreachable_patterns)]
        other => Err(AgentError::Config(format!(
            "provider '{other}' is not compiled into this build"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_provider() {
        let (kind, model) = parse_model_string("ollama/gemma3").unwrap();
        assert_eq!(kind, ProviderKind::Ollama);
        assert_eq!(model, "gemma3");
    }

    #[test]
    fn test_parse_defaults_to_groq() {
        let (kind, model) = parse_model_string("llama-3.3-70b-versatile").unwrap();
        assert_eq!(kind, ProviderKind::Groq);
        assert_eq!(model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_parse_keeps_nested_model_path() {
        let (kind, model) = parse_model_string("groq/meta-llama/llama-4-scout").unwrap();
        assert_eq!(kind, ProviderKind::Groq);
        assert_eq!(model, "meta-llama/llama-4-scout");
    }

    #[test]
    fn test_unsupported_provider() {
        let err = parse_model_string("anthropic/claude").unwrap_err();
        assert!(matches!(err, AgentError::Config(m) if m.contains("anthropic")));
    }

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in [
            ProviderKind::Ollama,
            ProviderKind::OpenAi,
            ProviderKind::Groq,
            ProviderKind::Azure,
        ] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
    }
}
