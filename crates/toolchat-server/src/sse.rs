//! Server-Sent Events framing for streamed completions

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use std::time::Duration;

use toolchat_core::{TurnChunk, TurnStream};

use crate::api::{completion_id, ChatCompletionChunk};

/// Frame a turn as `chat.completion.chunk` events.
///
/// The role opener comes first and `[DONE]` last. A failed turn contributes
/// one `finish_reason: "error"` chunk and is still followed by the stop chunk.
pub fn completion_events(
    turn: TurnStream<'static>,
    model: String,
) -> impl Stream<Item = ChatCompletionChunk> + Send + 'static {
    let id = completion_id();

    let opener = stream::once(futures::future::ready(ChatCompletionChunk::role(&id, &model)));
    let closer = stream::once(futures::future::ready(ChatCompletionChunk::stop(&id, &model)));

    let body = turn.map(move |chunk| match chunk {
        TurnChunk::Text(text) => ChatCompletionChunk::content(&id, &model, text),
        TurnChunk::Error(message) => ChatCompletionChunk::error(&id, &model, &message),
    });

    opener.chain(body).chain(closer)
}

/// Wrap a turn into an SSE response body
pub fn sse_response(
    turn: TurnStream<'static>,
    model: String,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = completion_events(turn, model)
        .map(|chunk| Event::default().json_data(chunk))
        .chain(stream::once(futures::future::ready(Ok(
            Event::default().data("[DONE]"),
        ))));

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
