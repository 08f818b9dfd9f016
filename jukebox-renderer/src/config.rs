//! Configuration management for jukebox-renderer
//!
//! TOML bootstrap (`renderer.toml`) with command-line overrides. Timing
//! knobs are in milliseconds in the file and become `Duration`s in
//! [`Timing`].
//!
//! Priority: command line > environment > TOML file > built-in defaults.

use crate::error::{Error, Result};
use jukebox_common::config::{default_data_folder, load_toml_or_default, LoggingConfig};
use jukebox_common::FadeCurve;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "renderer.toml";
const STATE_FILE_NAME: &str = "renderer_session";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server_url: String,
    pub player_id: Option<String>,
    /// Where the priority session id survives a restart
    pub state_file: Option<PathBuf>,
    pub heartbeat_interval_ms: u64,
    pub registration_retry_ms: u64,
    pub fade_duration_ms: u64,
    pub fade_curve: String,
    pub loading_timeout_ms: u64,
    pub advance_cooldown_ms: u64,
    pub advance_retry_ms: u64,
    pub max_consecutive_failures: u32,
    pub reconnect_delay_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        let timing = Timing::default();
        Self {
            server_url: "http://127.0.0.1:5740".to_string(),
            player_id: None,
            state_file: None,
            heartbeat_interval_ms: timing.heartbeat_interval.as_millis() as u64,
            registration_retry_ms: timing.registration_retry.as_millis() as u64,
            fade_duration_ms: timing.fade_duration.as_millis() as u64,
            fade_curve: "logarithmic".to_string(),
            loading_timeout_ms: timing.loading_timeout.as_millis() as u64,
            advance_cooldown_ms: timing.advance_cooldown.as_millis() as u64,
            advance_retry_ms: timing.advance_retry.as_millis() as u64,
            max_consecutive_failures: timing.max_consecutive_failures,
            reconnect_delay_ms: timing.reconnect_delay.as_millis() as u64,
            logging: LoggingConfig::default(),
        }
    }
}

/// Timers and limits shared by the arbiter client and the synchronizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Heartbeat period while priority
    pub heartbeat_interval: Duration,
    /// Registration re-attempt period while slave
    pub registration_retry: Duration,
    /// Skip fade-out length
    pub fade_duration: Duration,
    pub fade_curve: FadeCurve,
    /// Loading longer than this forces advancement
    pub loading_timeout: Duration,
    /// Advance requests within this window after an advance are dropped
    pub advance_cooldown: Duration,
    /// Wait before asking again after a failed `next` request
    pub advance_retry: Duration,
    /// Consecutive media failures before playback stops
    pub max_consecutive_failures: u32,
    /// Delay before reconnecting a dropped event stream
    pub reconnect_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(3),
            registration_retry: Duration::from_secs(5),
            fade_duration: Duration::from_secs(2),
            fade_curve: FadeCurve::Logarithmic,
            loading_timeout: Duration::from_secs(4),
            advance_cooldown: Duration::from_secs(1),
            advance_retry: Duration::from_secs(2),
            max_consecutive_failures: 5,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Command-line overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub server_url: Option<String>,
    pub player_id: Option<String>,
    pub state_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Resolved renderer configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub player_id: String,
    pub state_file: PathBuf,
    pub timing: Timing,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let toml_config: TomlConfig =
            load_toml_or_default(overrides.config_path.as_deref(), CONFIG_FILE_NAME)?;
        Self::resolve(toml_config, overrides)
    }

    pub fn resolve(toml_config: TomlConfig, overrides: ConfigOverrides) -> Result<Self> {
        let player_id = overrides
            .player_id
            .or(toml_config.player_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Config("player_id is required".to_string()))?;

        let server_url = overrides
            .server_url
            .unwrap_or(toml_config.server_url)
            .trim_end_matches('/')
            .to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(Error::Config(format!("server_url must be http(s): {}", server_url)));
        }

        let state_file = overrides
            .state_file
            .or(toml_config.state_file)
            .unwrap_or_else(|| {
                default_data_folder().join(format!("{}_{}", STATE_FILE_NAME, player_id))
            });

        let fade_curve = FadeCurve::parse(&toml_config.fade_curve).ok_or_else(|| {
            Error::Config(format!("unknown fade curve: {}", toml_config.fade_curve))
        })?;

        let timing = Timing {
            heartbeat_interval: Duration::from_millis(toml_config.heartbeat_interval_ms.max(1)),
            registration_retry: Duration::from_millis(toml_config.registration_retry_ms.max(1)),
            fade_duration: Duration::from_millis(toml_config.fade_duration_ms),
            fade_curve,
            loading_timeout: Duration::from_millis(toml_config.loading_timeout_ms.max(1)),
            advance_cooldown: Duration::from_millis(toml_config.advance_cooldown_ms),
            advance_retry: Duration::from_millis(toml_config.advance_retry_ms.max(1)),
            max_consecutive_failures: toml_config.max_consecutive_failures.max(1),
            reconnect_delay: Duration::from_millis(toml_config.reconnect_delay_ms.max(1)),
        };

        let mut logging = toml_config.logging;
        if let Some(level) = overrides.log_level {
            logging.level = level;
        }

        Ok(Self {
            server_url,
            player_id,
            state_file,
            timing,
            logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_timing() {
        let config = Config::resolve(
            TomlConfig::default(),
            ConfigOverrides {
                player_id: Some("bar".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.timing, Timing::default());
        assert_eq!(config.server_url, "http://127.0.0.1:5740");
        assert!(config.state_file.ends_with("renderer_session_bar"));
    }

    #[test]
    fn test_player_id_required() {
        let result = Config::resolve(TomlConfig::default(), ConfigOverrides::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_toml_values_and_overrides() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            server_url = "http://jukebox.local:8080/"
            player_id = "patio"
            fade_duration_ms = 500
            fade_curve = "linear"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            toml_config,
            ConfigOverrides {
                player_id: Some("lobby".to_string()),
                log_level: Some("trace".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.server_url, "http://jukebox.local:8080");
        assert_eq!(config.player_id, "lobby");
        assert_eq!(config.timing.fade_duration, Duration::from_millis(500));
        assert_eq!(config.timing.fade_curve, FadeCurve::Linear);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_unknown_fade_curve_rejected() {
        let toml_config = TomlConfig {
            player_id: Some("p".to_string()),
            fade_curve: "wobbly".to_string(),
            ..TomlConfig::default()
        };
        assert!(Config::resolve(toml_config, ConfigOverrides::default()).is_err());
    }
}
