//! MCP stdio server for eoka-pilot sessions.
//!
//! Logs go to stderr; stdout carries the protocol. Set `RUST_LOG` to tune.

mod mcp;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    mcp::run_server().await
}
