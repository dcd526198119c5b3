//! Logging setup
//!
//! Human-readable (or JSON) output on stderr. Debug mode, or an explicitly
//! configured log directory, adds a daily rolling file.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_PREFIX: &str = "auth-state.log";

/// Logging options, built up from CLI flags and config.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    debug_mode: bool,
    json: bool,
    file_output: bool,
    log_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            level: "info".to_string(),
            debug_mode: false,
            json: false,
            file_output: false,
            log_dir: default_log_dir(),
        }
    }

    /// Debug mode forces `debug` level and writes a log file.
    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug_mode = debug;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = dir;
        self
    }

    /// Write the rolling log file even outside debug mode.
    pub fn with_file_output(mut self, enabled: bool) -> Self {
        self.file_output = enabled;
        self
    }

    fn writes_file(&self) -> bool {
        self.debug_mode || self.file_output
    }

    fn filter_directive(&self) -> &str {
        if self.debug_mode { "debug" } else { &self.level }
    }
}

/// Default log directory: `<data_local_dir>/mysql-auth-state/logs`
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mysql-auth-state")
        .join("logs")
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. The returned guard must be held
/// for the life of the process or buffered file output is lost.
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let stderr_text = (!config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
    });
    let stderr_json = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
    });

    let (file_layer, guard) = if config.writes_file() {
        fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory: {:?}", config.log_dir)
        })?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_text)
        .with(stderr_json)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if config.writes_file() {
        tracing::debug!("Logging to {:?}", config.log_dir);
    }
    Ok(guard)
}

/// Most recently written log file in the default directory.
pub fn get_log_path() -> Option<PathBuf> {
    latest_log_in(&default_log_dir())
}

fn latest_log_in(dir: &Path) -> Option<PathBuf> {
    log_files(dir)
        .ok()?
        .into_iter()
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

/// Delete log files older than `days` from the default directory.
pub fn cleanup_old_logs(days: u64) -> Result<usize> {
    cleanup_old_logs_in(&default_log_dir(), days)
}

/// Delete log files older than `days` from `dir`. Returns how many were removed.
pub fn cleanup_old_logs_in(dir: &Path, days: u64) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let days = i64::try_from(days).unwrap_or(i64::MAX);
    let cutoff = chrono::TimeDelta::try_days(days)
        .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

    let mut removed = 0;
    for (path, modified) in log_files(dir)? {
        if modified < cutoff {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove log file: {:?}", path))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn log_files(dir: &Path) -> Result<Vec<(PathBuf, chrono::DateTime<chrono::Utc>)>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read log directory: {:?}", dir))?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            files.push((path, chrono::DateTime::<chrono::Utc>::from(modified)));
        }
    }
    Ok(files)
}
