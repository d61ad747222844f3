//! toolchat HTTP Server
//!
//! OpenAI-compatible chat completions backed by the tool-call loop. One MCP
//! tool server connection is shared by every request.

mod api;
mod handlers;
mod sse;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolchat_core::{LlmProvider, ToolRegistryClient};
use toolchat_runtime::{create_provider, McpStdioClient, RuntimeConfig};

use crate::handlers::{chat_completions, health_check};
use crate::state::AppState;

/// Build the router over shared state
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RuntimeConfig::from_env()?;

    // Connect to the tool server
    let registry = Arc::new(McpStdioClient::connect(&config.mcp).await?);
    let tool_names = registry.list_tool_names().await?;

    tracing::info!("Registered {} tools:", tool_names.len());
    for name in &tool_names {
        tracing::info!("  • {}", name);
    }

    // Verify the default provider
    match create_provider(config.provider) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => tracing::info!("✓ Connected to {}", provider.name()),
            Ok(false) | Err(_) => {
                tracing::warn!("⚠ {} not reachable - requests to it will fail", provider.name());
            }
        },
        Err(e) => tracing::warn!("⚠ Default provider unavailable: {}", e),
    }

    let addr = config.bind_addr.clone();
    let state = AppState::new(registry.clone(), tool_names, config);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 toolchat server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health               - Health check");
    tracing::info!("  POST /v1/chat/completions  - Chat completion (JSON or SSE)");
    tracing::info!("");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down, closing tool server");
    registry.close().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
