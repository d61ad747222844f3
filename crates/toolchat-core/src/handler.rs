//! Response handlers
//!
//! The conversation loop pushes output into a `ResponseHandler` and never
//! knows whether it lands in a buffer, a channel or a terminal.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::SinkExt;

/// Presentation capability driven by the conversation loop
#[async_trait]
pub trait ResponseHandler: Send {
    /// A non-empty fragment of model output
    async fn on_text_chunk(&mut self, text: &str);

    /// A turn-fatal error meant for the human caller
    async fn on_error(&mut self, message: &str);

    /// Tool activity about to be dispatched, e.g. `Schema for add`
    async fn on_tool_event(&mut self, _event: &str) {}
}

/// Collects everything into a single string
#[derive(Debug, Default)]
pub struct BufferingHandler {
    content: String,
}

impl BufferingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }
}

#[async_trait]
impl ResponseHandler for BufferingHandler {
    async fn on_text_chunk(&mut self, text: &str) {
        self.content.push_str(text);
    }

    async fn on_error(&mut self, message: &str) {
        self.content.push_str("Error: ");
        self.content.push_str(message);
    }
}

/// Item produced by a streamed turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnChunk {
    Text(String),
    Error(String),
}

/// Forwards output into a bounded channel.
///
/// `send` waits for capacity, so a slow consumer pauses the producer
/// instead of losing chunks.
pub struct ChannelHandler {
    tx: mpsc::Sender<TurnChunk>,
}

impl ChannelHandler {
    pub const fn new(tx: mpsc::Sender<TurnChunk>) -> Self {
        Self { tx }
    }

    async fn forward(&mut self, chunk: TurnChunk) {
        if self.tx.send(chunk).await.is_err() {
            tracing::debug!("Turn stream receiver dropped");
        }
    }
}

#[async_trait]
impl ResponseHandler for ChannelHandler {
    async fn on_text_chunk(&mut self, text: &str) {
        self.forward(TurnChunk::Text(text.to_string())).await;
    }

    async fn on_error(&mut self, message: &str) {
        self.forward(TurnChunk::Error(message.to_string())).await;
    }
}
