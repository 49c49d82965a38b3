//! restreamd - media-stream supervisor
//!
//! Entry point for the server binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use restreamd::config::Config;
use restreamd::server::Server;

/// Command-line arguments for restreamd
#[derive(Parser, Debug)]
#[command(name = "restreamd")]
#[command(version, about = "Media-stream supervisor", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/restreamd/config.toml")]
    pub config: String,

    /// Media root directory (overrides config)
    #[arg(short, long, env = "MEDIA_BASE_PATH")]
    pub media_root: Option<String>,

    /// Directory for rolling log files (console only when absent)
    #[arg(long, env = "RESTREAMD_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "compact")]
    pub log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The appender guard must outlive the runtime for buffered lines to
    // flush on exit.
    let _log_guard = init_logging(&args)?;

    info!(
        "Starting restreamd v{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_DATE")
    );

    // Load configuration
    let mut config = Config::load(&args.config).or_else(|e| {
        tracing::warn!("Failed to load config: {:#}, using defaults", e);
        Config::default_config()
    })?;

    // Override config with CLI args
    if let Some(media_root) = args.media_root {
        config.media.base_path = media_root.into();
    }

    info!("Configuration loaded successfully");
    tracing::debug!("Config: {:?}", config);

    let server = Server::new(config)?;
    server.start().await;

    info!("restreamd is running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.shutdown().await;
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("restreamd={},warn", log_level))
    });

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "restreamd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    match args.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }

    Ok(guard)
}
