//! Configuration management for jukebox-server
//!
//! Two tiers:
//! 1. **TOML bootstrap**: database path, bind address, port, logging
//!    (static, read once at startup)
//! 2. **Database runtime**: coordination timing and retry knobs in the
//!    `settings` table, global rows under player id `""`
//!
//! Priority: command line > environment > TOML file > built-in defaults.
//! Missing or unparsable runtime settings are initialised with built-in
//! defaults and written back to the database.

use crate::db::settings::{self, GLOBAL};
use crate::error::{Error, Result};
use jukebox_common::config::{load_toml_or_default, resolve_data_folder, LoggingConfig};
use jukebox_common::RetryPolicy;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5740;

/// Environment variable naming the data folder
pub const DATA_FOLDER_ENV: &str = "JUKEBOX_DATA_FOLDER";

const CONFIG_FILE_NAME: &str = "server.toml";
const DATABASE_FILE_NAME: &str = "jukebox.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file; defaults to `<data_folder>/jukebox.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub data_folder: Option<PathBuf>,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            data_folder: None,
            bind_address: default_bind_address(),
            port: default_port(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub data_folder: Option<PathBuf>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

/// Resolved bootstrap configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load TOML (if any) and apply overrides
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let toml_config: TomlConfig =
            load_toml_or_default(overrides.config_path.as_deref(), CONFIG_FILE_NAME)?;
        Ok(Self::resolve(toml_config, overrides))
    }

    pub fn resolve(toml_config: TomlConfig, overrides: ConfigOverrides) -> Self {
        let database_path = match overrides.database_path {
            Some(path) => path,
            None => match toml_config.database_path {
                Some(path) if overrides.data_folder.is_none() => path,
                _ => resolve_data_folder(
                    overrides.data_folder.as_deref(),
                    DATA_FOLDER_ENV,
                    toml_config.data_folder.as_deref(),
                )
                .join(DATABASE_FILE_NAME),
            },
        };

        let mut logging = toml_config.logging;
        if let Some(level) = overrides.log_level {
            logging.level = level;
        }

        Self {
            database_path,
            bind_address: toml_config.bind_address,
            port: overrides.port.unwrap_or(toml_config.port),
            logging,
        }
    }
}

/// Runtime settings loaded from the database
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// A priority session silent longer than this may be superseded
    pub liveness_window: Duration,
    /// Heartbeat cadence advertised to renderers
    pub heartbeat_interval: Duration,
    /// Backoff policy for conflict-prone mutations
    pub retry: RetryPolicy,
    /// Expose the separable set_active/clear_queue/import_queue playlist actions
    pub legacy_playlist_actions: bool,
    /// Event bus buffer per subscriber before it lags
    pub event_bus_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_millis(10_000),
            heartbeat_interval: Duration::from_millis(3_000),
            retry: RetryPolicy::default(),
            legacy_playlist_actions: false,
            event_bus_capacity: 1000,
        }
    }
}

impl RuntimeSettings {
    /// Load runtime settings, initialising missing values with defaults
    pub async fn load(db: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let liveness_ms = load_or_init(
            db,
            "liveness_window_ms",
            defaults.liveness_window.as_millis() as u64,
        )
        .await?;
        let heartbeat_ms = load_or_init(
            db,
            "heartbeat_interval_ms",
            defaults.heartbeat_interval.as_millis() as u64,
        )
        .await?;
        let max_attempts =
            load_or_init(db, "retry_max_attempts", defaults.retry.max_attempts).await?;
        let base_delay_ms = load_or_init(
            db,
            "retry_base_delay_ms",
            defaults.retry.base_delay.as_millis() as u64,
        )
        .await?;
        let max_delay_ms = load_or_init(
            db,
            "retry_max_delay_ms",
            defaults.retry.max_delay.as_millis() as u64,
        )
        .await?;
        let jitter_ms = load_or_init(
            db,
            "retry_jitter_ms",
            defaults.retry.jitter.as_millis() as u64,
        )
        .await?;
        let legacy_playlist_actions = load_or_init(
            db,
            "legacy_playlist_actions",
            defaults.legacy_playlist_actions,
        )
        .await?;
        let event_bus_capacity =
            load_or_init(db, "event_bus_capacity", defaults.event_bus_capacity).await?;

        if heartbeat_ms >= liveness_ms {
            warn!(
                heartbeat_ms,
                liveness_ms, "Heartbeat interval is not shorter than the liveness window"
            );
        }

        let settings = Self {
            liveness_window: Duration::from_millis(liveness_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            retry: RetryPolicy {
                max_attempts: max_attempts.max(1),
                base_delay: Duration::from_millis(base_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                jitter: Duration::from_millis(jitter_ms),
            },
            legacy_playlist_actions,
            event_bus_capacity: event_bus_capacity.max(1),
        };

        info!(
            liveness_window_ms = liveness_ms,
            heartbeat_interval_ms = heartbeat_ms,
            retry_max_attempts = settings.retry.max_attempts,
            legacy_playlist_actions,
            "Loaded runtime settings"
        );

        Ok(settings)
    }
}

/// Read one global setting, writing the default back when missing or invalid
async fn load_or_init<T>(db: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match settings::get_setting(db, GLOBAL, key).await? {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(key, value = %raw, default = %default, "Invalid setting, resetting to default");
                settings::set_setting(db, GLOBAL, key, &default.to_string()).await?;
                Ok(default)
            }
        },
        None => {
            settings::set_setting(db, GLOBAL, key, &default.to_string()).await?;
            Ok(default)
        }
    }
}

/// Check a database path for the obvious mistakes before opening it
pub fn validate_database_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Config("database path is empty".to_string()));
    }
    if path.is_dir() {
        return Err(Error::Config(format!(
            "database path {:?} is a directory",
            path
        )));
    }
    Ok(())
}
