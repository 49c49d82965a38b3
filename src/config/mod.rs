//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - Environment variables
//! - CLI arguments
//!
//! Environment variables recognized at load time:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `FFMPEG_PATH` | `encoder.ffmpeg_path` |
//! | `FFMPEG_HWACCEL_ENABLED` | `encoder.hwaccel_enabled` ("false" disables) |
//! | `FFMPEG_HWACCEL_AUTO` | `encoder.hwaccel_auto` ("true" enables) |
//! | `NVENC_PRESET` | `encoder.nvenc_preset` |
//! | `MEDIA_BASE_PATH` | `media.base_path` |
//! | `HEALTH_CHECK_INTERVAL` | `supervisor.health_check_interval_ms` |
//! | `MAX_LOG_ENTRIES_PER_CHANNEL` | `logging.max_log_entries_per_channel` |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod types;

pub use types::{
    EncoderConfig, FanoutConfig, LoggingConfig, MediaConfig, StoreConfig, SupervisorConfig,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Encoder invocation configuration
    #[serde(default = "default_encoder")]
    pub encoder: EncoderConfig,
    /// Media filesystem configuration
    #[serde(default = "default_media")]
    pub media: MediaConfig,
    /// Store configuration
    #[serde(default = "default_store")]
    pub store: StoreConfig,
    /// Supervisor configuration
    #[serde(default = "default_supervisor")]
    pub supervisor: SupervisorConfig,
    /// Subscriber push configuration
    #[serde(default = "default_fanout")]
    pub fanout: FanoutConfig,
    /// Logging configuration
    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

fn default_encoder() -> EncoderConfig {
    EncoderConfig {
        ffmpeg_path: "ffmpeg".to_string(),
        ffprobe_path: "ffprobe".to_string(),
        hwaccel_enabled: true,
        hwaccel_auto: false,
        nvenc_preset: None,
        vaapi_default_device: PathBuf::from("/dev/dri/renderD128"),
    }
}

fn default_media() -> MediaConfig {
    MediaConfig {
        base_path: PathBuf::from("/var/lib/restreamd/media"),
    }
}

fn default_store() -> StoreConfig {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("restreamd")
        .join("restreamd.db");
    StoreConfig { path }
}

fn default_supervisor() -> SupervisorConfig {
    SupervisorConfig {
        health_check_interval_ms: 30_000,
        restart_max_attempts: 25,
        restart_window_secs: 120,
        restart_delay_ms: 5_000,
        restarting_timeout_secs: 10,
        term_timeout_ms: 500,
        kill_timeout_ms: 200,
    }
}

fn default_fanout() -> FanoutConfig {
    FanoutConfig {
        push_interval_ms: 2_000,
        subscriber_buffer: 32,
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: "info".to_string(),
        log_dir: None,
        max_log_entries_per_channel: 1_000,
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let mut config: Config =
            toml::from_str(&content).context("Failed to parse config file")?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Create default configuration (env overrides still apply)
    pub fn default_config() -> Result<Self> {
        let mut config = Config {
            encoder: default_encoder(),
            media: default_media(),
            store: default_store(),
            supervisor: default_supervisor(),
            fanout: default_fanout(),
            logging: default_logging(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-variable overrides on top of file/default values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            if !path.is_empty() {
                self.encoder.ffmpeg_path = path;
            }
        }
        if let Ok(v) = std::env::var("FFMPEG_HWACCEL_ENABLED") {
            self.encoder.hwaccel_enabled = !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = std::env::var("FFMPEG_HWACCEL_AUTO") {
            self.encoder.hwaccel_auto = v.eq_ignore_ascii_case("true");
        }
        if let Ok(preset) = std::env::var("NVENC_PRESET") {
            if !preset.is_empty() {
                self.encoder.nvenc_preset = Some(preset);
            }
        }
        if let Ok(path) = std::env::var("MEDIA_BASE_PATH") {
            if !path.is_empty() {
                self.media.base_path = PathBuf::from(path);
            }
        }
        if let Ok(interval) = std::env::var("HEALTH_CHECK_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(ms) if ms > 0 => self.supervisor.health_check_interval_ms = ms,
                _ => tracing::warn!("Ignoring invalid HEALTH_CHECK_INTERVAL: {}", interval),
            }
        }
        if let Ok(cap) = std::env::var("MAX_LOG_ENTRIES_PER_CHANNEL") {
            match cap.parse::<u32>() {
                Ok(n) if n > 0 => self.logging.max_log_entries_per_channel = n,
                _ => tracing::warn!("Ignoring invalid MAX_LOG_ENTRIES_PER_CHANNEL: {}", cap),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.encoder.ffmpeg_path.is_empty() {
            anyhow::bail!("encoder.ffmpeg_path must not be empty");
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        if self.supervisor.health_check_interval_ms == 0 {
            anyhow::bail!("supervisor.health_check_interval_ms must be > 0");
        }
        if self.supervisor.restart_max_attempts == 0 {
            anyhow::bail!("supervisor.restart_max_attempts must be > 0");
        }
        if self.supervisor.restart_window_secs == 0 {
            anyhow::bail!("supervisor.restart_window_secs must be > 0");
        }
        if self.fanout.push_interval_ms == 0 {
            anyhow::bail!("fanout.push_interval_ms must be > 0");
        }
        if self.logging.max_log_entries_per_channel == 0 {
            anyhow::bail!("logging.max_log_entries_per_channel must be > 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config().expect("Failed to create default config")
    }
}
