//! Configuration loading and data folder resolution
//!
//! Each binary reads a small TOML bootstrap file (database path, port,
//! logging). Everything else lives in the `settings` table and is loaded at
//! runtime by the server.
//!
//! Resolution priority for paths:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directory name under the platform config/data dirs
const APP_DIR: &str = "jukebox";

/// Logging section shared by every bootstrap file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parse a TOML bootstrap file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))
}

/// Load a bootstrap file if one can be found, else `T::default()`
///
/// An explicitly requested path must exist; the platform default path is
/// optional.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(
    explicit: Option<&Path>,
    file_name: &str,
) -> Result<T> {
    if let Some(path) = explicit {
        let config = load_toml(path)?;
        tracing::info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    match default_config_path(file_name) {
        Some(path) if path.exists() => {
            let config = load_toml(&path)?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        _ => {
            tracing::debug!("No configuration file found, using built-in defaults");
            Ok(T::default())
        }
    }
}

/// Platform config file location, e.g. `~/.config/jukebox/server.toml`
///
/// On Linux falls back to `/etc/jukebox/<file>` when no user file exists.
pub fn default_config_path(file_name: &str) -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name));

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(file_name);
        match user_config {
            Some(path) if path.exists() => Some(path),
            _ if system_config.exists() => Some(system_config),
            other => other,
        }
    } else {
        user_config
    }
}

/// Resolve the data folder: CLI > env > TOML > OS default
pub fn resolve_data_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_data_folder()
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/jukebox (or /var/lib/jukebox for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/var/lib/jukebox"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/jukebox"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\jukebox"))
    } else {
        PathBuf::from("./jukebox_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    struct Sample {
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert!(logging.file.is_none());
    }

    #[test]
    fn test_load_toml_parses_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        std::fs::write(&path, "port = 7000\n[logging]\nlevel = \"debug\"\n").unwrap();

        let sample: Sample = load_toml(&path).unwrap();
        assert_eq!(sample.port, Some(7000));
        assert_eq!(sample.logging.level, "debug");
    }

    #[test]
    fn test_load_toml_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "port = \"not a number").unwrap();

        let err = load_toml::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_toml_or_default::<Sample>(Some(&missing), "sample.toml").is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_data_folder_priority() {
        let env_name = "JUKEBOX_TEST_DATA_FOLDER";
        std::env::set_var(env_name, "/from/env");

        let cli = PathBuf::from("/from/cli");
        let toml = PathBuf::from("/from/toml");

        assert_eq!(
            resolve_data_folder(Some(&cli), env_name, Some(&toml)),
            PathBuf::from("/from/cli")
        );
        assert_eq!(
            resolve_data_folder(None, env_name, Some(&toml)),
            PathBuf::from("/from/env")
        );

        std::env::remove_var(env_name);
        assert_eq!(
            resolve_data_folder(None, env_name, Some(&toml)),
            PathBuf::from("/from/toml")
        );
        assert_eq!(resolve_data_folder(None, env_name, None), default_data_folder());
    }
}
