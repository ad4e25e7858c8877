//! Daemon logging setup.
//!
//! Log levels use the classic syslog-style names accepted by `--log_level`
//! and are mapped onto `tracing` levels. `RUST_LOG`, when set, wins.
//!
//! # Example
//!
//! ```rust,no_run
//! use procsnitchd::logging::{init_logging, LogLevel};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(LogLevel::Info, None)?;
//!
//!     tracing::info!("Daemon started");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

use crate::error::StartupError;

/// Names accepted by `--log_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// The `tracing` filter this level enables.
    pub fn as_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info | LogLevel::Notice => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Notice => "NOTICE",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "NOTICE" => Ok(LogLevel::Notice),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(StartupError::InvalidLogLevel(s.to_string())),
        }
    }
}

fn env_filter(level: LogLevel) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.as_filter().into())
        .from_env_lossy()
}

/// Initialize logging to stderr, or to `log_file` when given.
///
/// Stderr output is coloured only when attached to a terminal.
pub fn init_logging(level: LogLevel, log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let registry = tracing_subscriber::registry().with(env_filter(level));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(false),
                )
                .try_init()
                .context("Failed to set subscriber")?;
        }
        None => {
            registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(std::io::stderr().is_terminal())
                        .with_target(false),
                )
                .try_init()
                .context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

/// Initialize file logging with daily rotation.
///
/// Older logs are kept as `<file name>.YYYY-MM-DD` next to `log_file`.
#[cfg(feature = "log-rotation")]
pub fn init_logging_with_rotation(level: LogLevel, log_file: &Path) -> Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let dir = log_file.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).context("Failed to create log directory")?;
    let prefix = log_file
        .file_name()
        .context("Log file path has no file name")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, prefix);

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .context("Failed to set subscriber")?;

    Ok(())
}
