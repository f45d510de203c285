//! tabpilot - browser control over stdio tool calls
//!
//! Reads one JSON request per line from stdin ({"tool": ..., "arguments":
//! {...}}), drives a Chrome instance through it, and writes one JSON result
//! per line to stdout. Logs go to stderr so the stdout stream stays clean.

mod catalog;
mod error;
mod executor;
mod reconcile;
mod registry;
mod session;
mod tools;

#[cfg(test)]
mod e2e;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session::SessionManager;
use tools::{Dispatcher, ToolResult};

/// One request line on the wire.
#[derive(Debug, Deserialize)]
struct Request {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabpilot=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    if std::env::args().any(|a| a == "--tools") {
        let listing = serde_json::to_string_pretty(&catalog::catalog())?;
        println!("{listing}");
        return Ok(());
    }

    let sessions = SessionManager::new();
    let dispatcher = Dispatcher::new(sessions.clone());

    tracing::info!("tabpilot ready, reading tool calls from stdin");
    serve(&dispatcher).await?;

    sessions.close_all().await;
    Ok(())
}

/// Request loop: one JSON object per line in, one per line out. Runs until
/// stdin closes or ctrl-c.
async fn serve(dispatcher: &Dispatcher) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            tracing::info!("stdin closed, shutting down");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                tracing::info!(tool = %request.tool, "Handling tool call");
                dispatcher.dispatch(&request.tool, &request.arguments).await
            }
            Err(e) => ToolResult::error(format!("invalid request: {e}")),
        };

        let mut out = serde_json::to_string(&result).unwrap_or_else(|e| {
            format!(
                r#"{{"content":[{{"type":"text","text":"serialization failed: {e}"}}],"isError":true}}"#
            )
        });
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
}
