//! Logging setup shared by pkfixer front ends.
//!
//! Console output follows the usual quiet/verbosity mapping; an optional
//! log file receives every status line at INFO (DEBUG when verbose), in
//! plain text regardless of console settings.

use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// Console level for the given flags.
pub fn console_level(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::ERROR,
        (false, 0) => LevelFilter::INFO,
        (false, 1) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    }
}

/// Log file path for a run starting now: `pkfixer_<YYYY-mm-dd_HH-MM-SS>.log`.
pub fn log_file_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("pkfixer_{}.log", stamp))
}

/// Initializes console logging and, if `log_file` is given, a plain-text
/// file layer.
///
/// # Example
/// ```rust,no_run
/// use pkfixer_core::logging::init_logging;
///
/// // INFO on the console, no log file
/// init_logging(0, false, None).expect("Failed to initialize logging");
/// ```
///
/// # Errors
/// Returns error if the log file cannot be created or a global subscriber
/// is already installed.
pub fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_level(verbose, quiet));

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path).map_err(|e| crate::error::FixerError::Io {
                context: format!("Failed to create log file {}", path.display()),
                source: e,
            })?;
            let level = if verbose > 0 {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            };
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(level),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::error::FixerError::configuration(format!("Failed to initialize logging: {}", e))
        })?;

    Ok(())
}
