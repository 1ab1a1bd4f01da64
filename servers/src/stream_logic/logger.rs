//! Logging for `server_stream`.
//!
//! Every record goes to stdout and to one file per process start under the
//! configured log directory:
//!
//! ```text
//! <log_dir>/server_stream_2024-05-01_09-30-00.log
//! [2024-05-01 09:30:01][lib_stream::core::supervisor][INFO] Session [Consumer_1714555801] is streaming.
//! ```
//!
//! The target column is the emitting module, so supervisor transitions, gate
//! registrations and per-batch failures can be grepped apart. Only the newest
//! previous `.log` file survives a restart.

use anyhow::Result;
use chrono::{DateTime, Local};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Clean up old log files, keeping only the most recent one
    cleanup_old_logs(log_dir)?;

    let log_path = log_dir.join(log_file_name(Local::now()));

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

/// Prefix shared by every log file this binary writes.
pub const LOG_FILE_PREFIX: &str = "server_stream_";

/// File name for a process started at `started`.
pub fn log_file_name(started: DateTime<Local>) -> String {
    format!("{}{}.log", LOG_FILE_PREFIX, started.format("%Y-%m-%d_%H-%M-%S"))
}

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .collect();

    // Sort by modification time, newest first
    entries.sort_by_key(|e| {
        std::cmp::Reverse(
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH),
        )
    });

    // Keep the most recent one (index 0), delete the rest
    for entry in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(entry.path()) {
            eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e);
        }
    }

    Ok(())
}
