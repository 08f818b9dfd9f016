//! Jukebox coordination server - main entry point

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_common::config::LoggingConfig;
use jukebox_server::config::{validate_database_path, Config, ConfigOverrides, RuntimeSettings};
use jukebox_server::{api, AppContext};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for jukebox-server
#[derive(Parser, Debug)]
#[command(name = "jukebox-server")]
#[command(about = "Shared playback queue coordination server")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "JUKEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "JUKEBOX_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(long, env = "JUKEBOX_DATABASE")]
    database: Option<PathBuf>,

    /// Folder holding jukebox.db when --database is not given
    #[arg(long)]
    data_folder: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "JUKEBOX_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(ConfigOverrides {
        config_path: args.config,
        database_path: args.database,
        data_folder: args.data_folder,
        port: args.port,
        log_level: args.log_level,
    })
    .context("Failed to load configuration")?;

    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting jukebox-server"
    );
    info!("Database: {}", config.database_path.display());

    validate_database_path(&config.database_path).context("Invalid database path")?;

    let db = jukebox_common::db::init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let settings = RuntimeSettings::load(&db)
        .await
        .context("Failed to load runtime settings")?;

    let ctx = AppContext::new(db.clone(), settings);

    api::serve(&config, ctx, shutdown_signal())
        .await
        .context("Server error")?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured level; optional file output
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "jukebox_server={level},jukebox_common={level},tower_http=info",
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

/// Graceful shutdown signal handler
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
