use std::path::PathBuf;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, VideoToolError};

/// Directory holding the rolling log files, relative to the working directory.
pub fn log_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()?.join(".videotool").join("log"))
}

/// Setup logging to both console and a daily rolling file
pub fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "videotool.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(verbose)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| VideoToolError::Config(format!("Failed to initialize logging: {}", e)))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("videotool.log").display()
    );

    Ok(())
}
