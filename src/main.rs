/// SplitFast MCP Server Entry Point
///
/// Loads configuration from the environment, opens the expense ledger and
/// starts the configured transport (STDIO, Streamable HTTP, or both). See
/// `core::config` for the recognised environment variables.
///
/// Logging goes to stderr and is filtered by RUST_LOG (default: "info");
/// stdout carries nothing but protocol frames in STDIO mode.

mod core;
mod ledger;
mod tools;

use std::io;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::core::config::{Config, TransportMode};
use crate::core::server::{self, McpServer};
use crate::ledger::Ledger;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // try_init also bridges `log` records from the actix Logger middleware
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

#[tokio::main]
async fn main() -> io::Result<()> {
    init_tracing();

    let config = Config::from_env().map_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    let ledger = if config.db_path == ":memory:" {
        Ledger::open_in_memory()
    } else {
        Ledger::open(&config.db_path)
    };
    let ledger = ledger.map_err(|e| {
        tracing::error!(path = %config.db_path, error = %e, "cannot open ledger");
        io::Error::other(e)
    })?;
    let registry = server::initialize_tools(Arc::new(ledger));
    let mcp = Arc::new(McpServer::new(config.info.clone(), registry));

    tracing::info!(transport = %config.transport, db = %config.db_path, "starting SplitFast");

    match config.transport {
        TransportMode::Stdio => server::run_server_stdio(mcp).await,
        TransportMode::Http => server::run_server_http(&config, mcp).await,
        TransportMode::Both => {
            // STDIO in the background, HTTP in the foreground
            let stdio = Arc::clone(&mcp);
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = server::run_server_stdio(stdio).await {
                    tracing::error!(error = %e, "STDIO transport failed");
                }
            });

            let http_result = server::run_server_http(&config, mcp).await;

            // If HTTP server exits, abort STDIO task
            stdio_handle.abort();
            http_result
        }
    }
}
