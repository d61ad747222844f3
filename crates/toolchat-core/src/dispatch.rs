//! Tool-call dispatch
//!
//! Turns an extracted [`ToolRequest`] into the system message that records
//! its outcome. Tool-level failures become model-visible error messages;
//! transport failures propagate and abort the turn.

use crate::error::{AgentError, Result};
use crate::extract::{RequestKind, ToolRequest};
use crate::registry::{SchemaCache, ToolRegistryClient};

/// Whether an execute-request must be preceded by a schema-request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaPolicy {
    /// The model may execute a tool it never asked the schema for
    #[default]
    Permissive,
    /// Executing a tool whose schema is not cached in the session is an error
    RequireSchemaFirst,
}

/// Outcome of one dispatch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatch {
    /// System message to append to the conversation
    pub message: String,

    /// Whether the model should be queried again
    pub continue_loop: bool,
}

impl Dispatch {
    fn proceed(message: String) -> Self {
        Self {
            message,
            continue_loop: true,
        }
    }
}

/// Resolve `request` against the registry and render its outcome.
pub async fn dispatch(
    request: ToolRequest,
    registry: &dyn ToolRegistryClient,
    cache: &mut SchemaCache,
    policy: SchemaPolicy,
) -> Result<Dispatch> {
    match request {
        ToolRequest::Schema { tool_name } => {
            match cache.get_or_fetch(&tool_name, registry).await {
                Ok(schema) => {
                    tracing::info!(tool = %tool_name, "Tool schema sent to model");
                    let json = serde_json::to_string_pretty(&schema)?;
                    Ok(Dispatch::proceed(format!(
                        "Use the following schema for tool '{tool_name}':\n{json}"
                    )))
                }
                Err(e) => recover(RequestKind::Schema, e),
            }
        }

        ToolRequest::Execute {
            tool_name,
            arguments,
        } => {
            if policy == SchemaPolicy::RequireSchemaFirst && !cache.contains(&tool_name) {
                tracing::debug!(tool = %tool_name, "Execute rejected, schema not requested");
                return Ok(error_message(
                    RequestKind::Execute,
                    &format!("request the schema for tool '{tool_name}' before executing it"),
                ));
            }

            match registry.execute_tool(&tool_name, arguments).await {
                Ok(result) => {
                    tracing::info!(tool = %tool_name, "Tool executed");
                    let json = serde_json::to_string_pretty(&result)?;
                    Ok(Dispatch::proceed(format!(
                        "This is the result of executing '{tool_name}':\n{json}"
                    )))
                }
                Err(e) => recover(RequestKind::Execute, e),
            }
        }

        ToolRequest::Malformed { kind, reason } => {
            tracing::debug!(kind = kind.as_str(), %reason, "Malformed tool request");
            Ok(error_message(kind, &reason))
        }
    }
}

fn recover(kind: RequestKind, err: AgentError) -> Result<Dispatch> {
    if !err.is_tool_level() {
        return Err(err);
    }
    tracing::warn!(kind = kind.as_str(), error = %err, "Tool request failed");
    Ok(error_message(kind, &err.to_string()))
}

fn error_message(kind: RequestKind, detail: &str) -> Dispatch {
    let message = match kind {
        RequestKind::Schema => format!("Error getting schema: {detail}"),
        RequestKind::Execute => format!("Error executing tool: {detail}"),
    };
    Dispatch::proceed(message)
}
