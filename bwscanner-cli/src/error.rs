//! CLI error type.

use std::fmt;

use bwscanner::app::AppError;
use bwscanner::config::ConfigError;
use bwscanner::store::StoreError;
use bwscanner::weights::WeightFileError;

/// Errors surfaced to the user by a command.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded, saved or applied.
    Config(String),
    /// The scanner failed while running.
    Scan(String),
    /// Result files could not be read.
    Results(String),
    /// The weight file could not be written.
    WeightFile(String),
    /// Async runtime could not be started.
    Runtime(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Scan(msg) => write!(f, "Scanner error: {}", msg),
            CliError::Results(msg) => write!(f, "Result store error: {}", msg),
            CliError::WeightFile(msg) => write!(f, "Weight file error: {}", msg),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Results(e.to_string())
    }
}

impl From<WeightFileError> for CliError {
    fn from(e: WeightFileError) -> Self {
        CliError::WeightFile(e.to_string())
    }
}

impl From<AppError> for CliError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Config(e) => e.into(),
            AppError::Store(e) => e.into(),
            AppError::WeightFile(e) => e.into(),
            other => CliError::Scan(other.to_string()),
        }
    }
}
