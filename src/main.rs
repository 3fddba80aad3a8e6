//! Chat Relay Server - Entry Point
//!
//! Binds the listener and serves connections until Ctrl-C.

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    // Bind address from command line overrides the environment
    let mut config = ServerConfig::from_env();
    if let Some(addr) = env::args().nth(1) {
        config.addr = addr;
    }

    let server = ChatServer::bind(&config).await?;
    info!("Chat relay listening on {}", server.local_addr()?);

    server.run_until_ctrl_c().await?;
    Ok(())
}
