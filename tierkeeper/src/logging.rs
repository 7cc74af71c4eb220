//! Logging setup for the storage service.
//!
//! Events go to the configured log file and to stdout. The file is
//! truncated when logging starts. Filtering follows `RUST_LOG` and
//! defaults to `info`.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize logging to `log_file` and stdout.
///
/// Creates the parent directory and clears any previous content.
///
/// # Errors
///
/// Returns an error if the directory cannot be created, the file cannot be
/// cleared, or a global subscriber is already installed.
pub fn init_logging(log_file: &Path) -> Result<LoggingGuard, io::Error> {
    let (dir, name) = prepare_log_file(log_file)?;

    let file_appender = tracing_appender::rolling::never(dir, name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Initialize logging from the `[logging]` settings.
pub fn init_from_settings(settings: &LoggingSettings) -> Result<LoggingGuard, io::Error> {
    init_logging(&settings.file)
}

/// Create the log directory and truncate the file.
///
/// Returns the directory and file name for the appender.
fn prepare_log_file(log_file: &Path) -> io::Result<(PathBuf, OsString)> {
    let name = log_file.file_name().map(OsString::from).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("log file {} has no file name", log_file.display()),
        )
    })?;
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    fs::create_dir_all(&dir)?;
    fs::write(log_file, "")?;
    Ok((dir, name))
}
