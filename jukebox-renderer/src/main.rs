//! Jukebox renderer - main entry point

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_common::config::LoggingConfig;
use jukebox_renderer::config::{Config, ConfigOverrides};
use jukebox_renderer::engine::HeadlessEngine;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for jukebox-renderer
#[derive(Parser, Debug)]
#[command(name = "jukebox-renderer")]
#[command(about = "Playback renderer instance for a jukebox player")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "JUKEBOX_RENDERER_CONFIG")]
    config: Option<PathBuf>,

    /// Coordination server origin, e.g. http://127.0.0.1:5740
    #[arg(short, long, env = "JUKEBOX_SERVER_URL")]
    server_url: Option<String>,

    /// Player this instance renders
    #[arg(short = 'P', long, env = "JUKEBOX_PLAYER_ID")]
    player_id: Option<String>,

    /// File holding the priority session id across restarts
    #[arg(long, env = "JUKEBOX_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "JUKEBOX_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(ConfigOverrides {
        config_path: args.config,
        server_url: args.server_url,
        player_id: args.player_id,
        state_file: args.state_file,
        log_level: args.log_level,
    })
    .context("Failed to load configuration")?;

    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting jukebox-renderer");
    info!("Session state file: {}", config.state_file.display());

    let (signal_tx, signal_rx) = mpsc::channel(64);
    let engine = Arc::new(HeadlessEngine::new(signal_tx, Duration::from_secs(1)));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    jukebox_renderer::run(config, engine, signal_rx, cancel)
        .await
        .context("Renderer failed")?;

    info!("Renderer shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured level; optional file output
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "jukebox_renderer={level},jukebox_common={level}",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
