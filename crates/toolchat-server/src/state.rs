//! Application State

use std::sync::Arc;

use toolchat_core::{LlmProvider, Result, ToolRegistryClient};
use toolchat_runtime::{create_provider, ProviderKind, RuntimeConfig};

/// Builds a provider for a request's `provider/` prefix
pub type ProviderFactory =
    Arc<dyn Fn(ProviderKind) -> Result<Arc<dyn LlmProvider>> + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The single tool server connection shared by every session
    pub registry: Arc<dyn ToolRegistryClient>,

    /// Tool names listed once at startup
    pub tool_names: Arc<[String]>,

    pub config: Arc<RuntimeConfig>,

    pub providers: ProviderFactory,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn ToolRegistryClient>,
        tool_names: Vec<String>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            tool_names: tool_names.into(),
            config: Arc::new(config),
            providers: Arc::new(create_provider),
        }
    }

    /// Replace how providers are constructed
    #[must_use]
    pub fn with_providers(mut self, providers: ProviderFactory) -> Self {
        self.providers = providers;
        self
    }

    /// `"<provider>/<model>"` used when a request names no model
    pub fn default_model(&self) -> String {
        format!("{}/{}", self.config.provider, self.config.model())
    }
}
