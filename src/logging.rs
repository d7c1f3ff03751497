// src/logging.rs

//! Logging setup for `runjob` using `tracing` + `tracing-subscriber`.
//!
//! Priority for the stderr level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `RUNJOB_LOG` environment variable (e.g. "info", "debug")
//! 3. `[log] stdout_level` from the configuration
//!
//! A second layer writes to `[log] file_path` when `[log] file_level` is not
//! `off`.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

use crate::cli::LogLevel;
use crate::config::expand_user;
use crate::config::model::LogSection;
use crate::errors::Result;

pub const LOG_ENV: &str = "RUNJOB_LOG";

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, log: &LogSection) -> Result<()> {
    if !log.enabled {
        return Ok(());
    }

    let stderr_level = match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => std::env::var(LOG_ENV)
            .ok()
            .and_then(|s| parse_level_filter(&s))
            .or_else(|| parse_level_filter(&log.stdout_level))
            .unwrap_or(LevelFilter::WARN),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(stderr_level);

    let file_level = parse_level_filter(&log.file_level).unwrap_or(LevelFilter::OFF);
    let file_layer = match (&log.file_path, file_level) {
        (Some(path), level) if level != LevelFilter::OFF => {
            let path = expand_user(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {:?}", path))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(level),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))?;

    Ok(())
}

fn level_from_log_level(lvl: LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

/// Parse a level name as used in the config file and `RUNJOB_LOG`.
pub fn parse_level_filter(s: &str) -> Option<LevelFilter> {
    match s.trim().to_lowercase().as_str() {
        "off" => Some(LevelFilter::OFF),
        "error" => Some(LevelFilter::ERROR),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}
