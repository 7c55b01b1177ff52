//! Tracing subscriber setup.
//!
//! Console output always goes to stderr. When file logging is enabled, a
//! daily-rolling file is written through a non-blocking appender; the
//! returned [`LoggingGuard`] must be held for as long as logs should flush.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "bwscanner.log";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Directory for rolling log files; `None` disables file logging.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Raise the level by `verbosity` steps (`-v` flags on the command line).
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.level = match verbosity {
            0 => self.level,
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
        self
    }
}

/// Keeps the file appender's worker alive.
#[derive(Debug, Default)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Calling this more than once keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) -> LoggingGuard {
    if tracing::dispatcher::has_been_set() {
        return LoggingGuard::default();
    }

    let filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(filter());

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();

    tracing::debug!(level = %config.level, file = config.directory.is_some(), "Logging initialized");
    LoggingGuard { _file: guard }
}
