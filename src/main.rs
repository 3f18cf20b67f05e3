//! Memory-augmented generation server.
//!
//! Entry point: loads configuration and serves the HTTP API.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use memloom::config::AppConfig;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        name: "config.loaded",
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    if let Err(e) = memloom::server::start_server(config).await {
        tracing::error!(error = %format!("{e:#}"), "Server failed");
        std::process::exit(1);
    }
}
