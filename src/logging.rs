// src/logging.rs

//! Logging setup for `sheetflow` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. an explicit level (usually `[logging].level` from the engine config)
//! 2. `SHEETFLOW_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for whatever the host
//! process prints.

use std::str::FromStr;

use serde::Deserialize;
use tracing_subscriber::fmt;

use crate::errors::{Result, SheetflowError};

/// Log level as accepted in config files.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("invalid log level: {other}")),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup; a second call reports an error instead of
/// panicking.
pub fn init_logging(level: Option<LogLevel>) -> Result<()> {
    let level: tracing::Level = match level {
        Some(lvl) => lvl.into(),
        None => std::env::var("SHEETFLOW_LOG")
            .ok()
            .and_then(|s| LogLevel::from_str(&s).ok())
            .map(Into::into)
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| SheetflowError::ConfigError(format!("logging already initialised: {e}")))?;

    Ok(())
}
