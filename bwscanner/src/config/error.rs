//! Configuration error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the scanner configuration.
///
/// These are fatal at startup: nothing is measured with a configuration
/// that failed to load.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The home directory has no configuration file.
    #[error("{} is not initialized (missing {}); run `bwscanner init`", home.display(), path.display())]
    NotInitialized { home: PathBuf, path: PathBuf },

    /// The configuration file could not be read or written.
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The configuration file is not valid INI.
    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// One or more options have bad values or bad combinations of values.
    #[error("invalid configuration:\n  {}", errors.join("\n  "))]
    Invalid { errors: Vec<String> },
}
