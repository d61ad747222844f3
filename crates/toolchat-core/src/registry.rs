//! Tool Registry Client
//!
//! Contract for a remote process or service that hosts tools. The
//! conversation loop never runs a tool itself; it asks the registry for
//! schemas and executions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::Result;

/// Tool definition as reported by the registry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the LLM)
    #[serde(default)]
    pub description: String,

    /// JSON-Schema-like input contract
    pub parameters: Value,
}

/// Capability over a tool-hosting process.
///
/// A single client may be shared by many sessions at once, so
/// implementations must keep concurrent calls from interleaving on the wire.
#[async_trait]
pub trait ToolRegistryClient: Send + Sync {
    /// Names of every registered tool
    async fn list_tool_names(&self) -> Result<Vec<String>>;

    /// Schema for `name`; fails with `UnknownTool` if it is not registered
    async fn get_tool_schema(&self, name: &str) -> Result<ToolSchema>;

    /// Run `name` with `arguments`; fails with `UnknownTool` or `ToolExecution`
    async fn execute_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value>;

    /// Release all transport resources. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Per-session schema cache.
///
/// Entries live until the owning session is dropped; there is no expiry.
#[derive(Clone, Debug, Default)]
pub struct SchemaCache {
    schemas: HashMap<String, ToolSchema>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ToolSchema> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Return the cached schema for `name`, fetching it from `registry` once.
    pub async fn get_or_fetch(
        &mut self,
        name: &str,
        registry: &dyn ToolRegistryClient,
    ) -> Result<ToolSchema> {
        if let Some(schema) = self.get(name) {
            tracing::debug!(tool = %name, "Schema served from cache");
            return Ok(schema.clone());
        }

        let schema = registry.get_tool_schema(name).await?;
        self.schemas.insert(name.to_string(), schema.clone());
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
