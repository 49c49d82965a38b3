//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Encoder invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// Path to the ffprobe binary (stream analysis)
    pub ffprobe_path: String,

    /// Enable hardware-codec substitution globally
    pub hwaccel_enabled: bool,

    /// Substitute hardware codecs even for `copy`/unspecified requests
    pub hwaccel_auto: bool,

    /// NVENC preset override; supersedes per-channel presets when set
    pub nvenc_preset: Option<String>,

    /// Default VAAPI render device when enumeration finds nothing
    pub vaapi_default_device: PathBuf,
}

/// Media filesystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Root directory for per-channel output (HLS segments, playlists)
    pub base_path: PathBuf,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; `:memory:` for an ephemeral store
    pub path: PathBuf,
}

/// Supervisor timing and restart-policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Health-loop reconciliation period in milliseconds
    pub health_check_interval_ms: u64,

    /// Maximum auto-restart attempts inside the rolling window
    pub restart_max_attempts: u32,

    /// Rolling restart-budget window in seconds
    pub restart_window_secs: u64,

    /// Delay before an auto-restart re-spawn in milliseconds
    pub restart_delay_ms: u64,

    /// A channel stuck in RESTARTING longer than this is demoted to ERROR
    pub restarting_timeout_secs: u64,

    /// Grace period after SIGTERM before escalating, in milliseconds
    pub term_timeout_ms: u64,

    /// Wait after SIGKILL before giving up, in milliseconds
    pub kill_timeout_ms: u64,
}

/// Subscriber push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Cadence of snapshot pushes to followers, in milliseconds
    pub push_interval_ms: u64,

    /// Per-subscriber outbound buffer; full buffers drop snapshots
    pub subscriber_buffer: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Directory for log files (None = console only)
    pub log_dir: Option<PathBuf>,

    /// Per-channel cap on persisted channel_logs rows
    pub max_log_entries_per_channel: u32,
}
