//! Scanner configuration.
//!
//! The configuration lives in `<home>/config.ini` and is loaded once at
//! startup. Components never read it directly: `app::AppConfig` converts
//! the loaded [`ConfigFile`] into immutable per-component settings that are
//! passed in at construction.

mod error;
mod file;
mod validate;

pub use error::ConfigError;
pub use file::{
    default_home_dir, CleanupSettings, ConfigFile, DestinationSettings, GeneralSettings,
    LoggingSettings, PathSettings, PrioritizerSettings, ScannerSettings, CONFIG_FILENAME,
    DEFAULT_HOME_DIRNAME,
};
