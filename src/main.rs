//! Room Relay signaling server
//!
//! WebSocket relay for WebRTC signaling. Peers join named rooms and exchange
//! offers, answers and ICE candidates through the relay, which forwards them
//! to the other members of the room without inspecting them.

mod config;
mod registry;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::RelayConfig;
use registry::ConnectionRegistry;
use server::{SignalingRouter, WebSocketServer};

/// Room Relay signaling server
///
/// Relays WebRTC negotiation messages between peers in the same room
#[derive(Parser, Debug)]
#[command(name = "room-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Send an error message back to clients whose input is rejected
    #[arg(long)]
    reply_errors: bool,

    /// Route offers, answers and candidates without a room to the sender's room
    #[arg(long)]
    infer_room: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Merge command line overrides into the file configuration
    fn into_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    warn!("Config file {} not found, using defaults", path.display());
                }
                RelayConfig::load(path)?
            }
            None => RelayConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        config.reply_errors |= self.reply_errors;
        config.infer_room |= self.infer_room;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Room Relay v{}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config()?;
    if config.reply_errors {
        info!("Error replies enabled");
    }
    if config.infer_room {
        info!("Room inference enabled");
    }

    let registry = Arc::new(ConnectionRegistry::new());
    let router = SignalingRouter::with_options(registry, config.router_options());

    let server = Arc::new(WebSocketServer::new(config.server_config(), router));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
