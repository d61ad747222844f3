//! # toolchat-core
//!
//! The agentic tool-call loop: a streaming conversation state machine that
//! lets a model fetch tool schemas and execute tools through a side channel
//! embedded in its own replies.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ChatSession                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │  Extractor  │  │ Dispatcher  │  │     LlmProvider      │  │
//! │  │ (tool JSON) │──│ (+ schemas) │──│     (Strategy)       │  │
//! │  └─────────────┘  └──────┬──────┘  └──────────────────────┘  │
//! └──────────────────────────┼───────────────────────────────────┘
//!                            ▼
//!                  ToolRegistryClient (remote)
//! ```
//!
//! Output reaches callers through a `ResponseHandler`, or as a
//! `TurnStream` of chunks.

pub mod dispatch;
pub mod error;
pub mod extract;
pub mod handler;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

pub use dispatch::{Dispatch, SchemaPolicy};
pub use error::{AgentError, Result};
pub use extract::{extract, RequestKind, ToolRequest};
pub use handler::{BufferingHandler, ResponseHandler, TurnChunk};
pub use message::{Conversation, Message, Role};
pub use provider::{CompletionStream, GenerationOptions, LlmProvider, StreamChunk};
pub use registry::{SchemaCache, ToolRegistryClient, ToolSchema};
pub use session::{ChatSession, SessionBuilder, SessionConfig, TurnState, TurnStream};
