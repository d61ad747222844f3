//! toolchat console
//!
//! Chat with a model that can call MCP tools. Type `exit` or `quit` to leave.

mod console;

use std::sync::Arc;

use clap::Parser;
use crossterm::style::Stylize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolchat_core::ChatSession;
use toolchat_runtime::{create_provider, parse_model_string, McpServerConfig, McpStdioClient, RuntimeConfig};

use crate::console::ConsoleHandler;

#[derive(Parser, Debug)]
#[command(name = "toolchat", version, about = "Chat with an LLM that can call MCP tools")]
struct Cli {
    /// `<provider>/<model>`, e.g. `ollama/gemma3`; a bare model uses groq
    #[arg(long)]
    model: Option<String>,

    /// Command that starts the MCP tool server
    #[arg(long)]
    mcp_command: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the reply
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = RuntimeConfig::from_env()?;
    if let Some(command) = &cli.mcp_command {
        config.mcp = McpServerConfig::from_command_line(command)?;
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = temperature;
    }

    let (kind, model) = match &cli.model {
        Some(model) => parse_model_string(model)?,
        None => (config.provider, config.model().to_string()),
    };

    let provider = create_provider(kind)?;
    let registry = Arc::new(McpStdioClient::connect(&config.mcp).await?);

    let mut session = ChatSession::builder()
        .provider(provider)
        .registry(registry)
        .config(config.session_config(model.as_str()))
        .build()
        .await?;

    println!("{} {}/{}", "toolchat".bold(), kind, model);
    println!("Tools: {}", session.tool_names().join(", "));
    println!("Type 'exit' or 'quit' to leave.");

    let result = chat_loop(&mut session).await;

    session.close().await?;
    result
}

async fn chat_loop(session: &mut ChatSession) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n{} ", "You:".blue().bold());
        std::io::Write::flush(&mut std::io::stdout())?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let mut handler = ConsoleHandler::stdio();
        handler.begin()?;
        // Failures were already shown through the handler; the session lives on.
        // Dropping the turn on ctrl-c cancels the model stream and any tool call.
        let interrupted = tokio::select! {
            _ = session.run_turn(input, &mut handler) => false,
            _ = tokio::signal::ctrl_c() => true,
        };
        handler.finish()?;

        if interrupted {
            println!("{}", "(interrupted)".dim());
            break;
        }
    }

    println!("\nGoodbye!");
    Ok(())
}
