//! # Aimux Gateway Binary
//!
//! Entry point for the `aimux` server: a multi-provider AI gateway that
//! accepts Anthropic-compatible chat requests, routes them by capability
//! and health, and returns normalized responses.
//!
//! ## Usage
//!
//! ```bash
//! # default configuration file (aimux.toml)
//! aimux
//!
//! # explicit configuration and binding
//! aimux --config /etc/aimux/aimux.toml --host 0.0.0.0 --port 8080
//!
//! # verbose logging
//! aimux --log-level debug
//! ```
//!
//! ## Exit codes
//!
//! - `0` — clean shutdown
//! - `64` — configuration validation failure
//! - `69` — listener bind failure
//! - `74` — unrecoverable runtime error

use aimux_gateway::config::AimuxConfig;
use aimux_gateway::server::{create_server, shutdown_signal};
use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;

const EXIT_CONFIG: u8 = 64;
const EXIT_BIND: u8 = 69;
const EXIT_RUNTIME: u8 = 74;

/// Command line arguments for the gateway server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "aimux.toml")]
    config: String,

    /// Override the configured listener port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured listener host
    #[arg(long)]
    host: Option<String>,

    /// Logging level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match AimuxConfig::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Err(error) = config.validate() {
        eprintln!("configuration error: {error}");
        return ExitCode::from(EXIT_CONFIG);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let drain_window = config.server.drain_window();
    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse()
    {
        Ok(addr) => addr,
        Err(error) => {
            tracing::error!("invalid listen address: {error}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let (app, state) = match create_server(config).await {
        Ok(built) => built,
        Err(error) => {
            tracing::error!("failed to build server: {error}");
            return ExitCode::from(EXIT_RUNTIME);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!("failed to bind {addr}: {error}");
            return ExitCode::from(EXIT_BIND);
        }
    };
    tracing::info!("aimux gateway listening on {addr}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
    });

    if let Err(error) = serve.await {
        tracing::error!("server error: {error}");
        return ExitCode::from(EXIT_RUNTIME);
    }

    // drain in-flight requests before exiting
    state.core.begin_shutdown();
    if state.core.drain(drain_window).await {
        tracing::info!("gateway drained cleanly");
    } else {
        tracing::warn!(
            in_flight = state.metrics.requests_in_flight(),
            "drain window elapsed with requests still in flight"
        );
    }

    ExitCode::SUCCESS
}
