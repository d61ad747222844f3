//! HTTP Handlers

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use toolchat_core::ChatSession;
use toolchat_runtime::parse_model_string;

use crate::api::{ApiError, ChatCompletion, ChatCompletionRequest};
use crate::sse::sse_response;
use crate::state::AppState;

const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub tools: usize,
    pub default_model: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        tools: state.tool_names.len(),
        default_model: state.default_model(),
    })
}

/// `POST /v1/chat/completions`
///
/// Every request gets a fresh session; only its last user message is sent.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let Some(user_message) = request.last_user_message().map(str::to_owned) else {
        return Err(ApiError::bad_request("No user message found"));
    };

    let model = request.model.clone().unwrap_or_else(|| state.default_model());
    let (kind, model_name) = parse_model_string(&model)?;
    let provider = (state.providers)(kind)?;

    let mut config = state.config.session_config(model_name);
    config.generation.temperature = request.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    config.generation.max_tokens = request.max_tokens;

    let mut session = ChatSession::new(
        provider,
        state.registry.clone(),
        state.tool_names.to_vec(),
        config,
    );
    tracing::info!(session = %session.id(), model = %model, stream = request.stream, "Chat completion");

    if request.stream {
        return Ok(sse_response(session.into_turn_stream(user_message), model).into_response());
    }

    let content = session.process_turn(&user_message).await.map_err(|e| {
        tracing::error!("Turn failed: {}", e);
        ApiError::internal(e.user_message())
    })?;

    Ok(Json(ChatCompletion::new(model, &user_message, content)).into_response())
}
