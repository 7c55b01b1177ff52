//! Common helpers shared across CLI commands.

use std::path::{Path, PathBuf};

use bwscanner::app::AppConfig;
use bwscanner::config::{default_home_dir, ConfigFile};
use bwscanner::logging::{init_logging, LoggingConfig, LoggingGuard};
use bwscanner::store::ResultStore;
use chrono::Utc;

use crate::error::CliError;

/// The home directory from `--home`, or `~/.bwscanner`.
pub fn resolve_home(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(default_home_dir)
}

/// Load `<home>/config.ini` and derive component settings from it.
pub fn load_app_config(home: &Path) -> Result<AppConfig, CliError> {
    let config = ConfigFile::load_from(home)?;
    Ok(AppConfig::from_config_file(&config))
}

/// Console-only logging for short-lived commands.
pub fn init_console_logging(verbosity: u8) -> LoggingGuard {
    init_logging(&LoggingConfig::default().with_verbosity(verbosity))
}

/// Logging as configured, raised by `-v` flags.
pub fn init_configured_logging(config: &AppConfig, verbosity: u8) -> LoggingGuard {
    init_logging(&config.logging.clone().with_verbosity(verbosity))
}

/// Open the result store with the configured validity window.
pub fn open_store(config: &AppConfig) -> Result<ResultStore, CliError> {
    Ok(ResultStore::open(
        &config.datadir,
        config.data_period_days,
        Utc::now(),
    )?)
}
