//! Application bootstrap.
//!
//! Turns a loaded configuration into a running scanner:
//!
//! ```text
//! ConfigFile ──► AppConfig ──► ScannerApp
//!                               ├── ResultStore + FileNodeFeed   (open)
//!                               ├── TimeoutPathBuilder<Proxy>    (scan)
//!                               ├── MeasurementScheduler         (scan)
//!                               ├── RetentionDaemon              (scan, cleanup)
//!                               └── WeightFileGenerator          (generate)
//! ```

mod bootstrap;
mod config;
mod error;

pub use bootstrap::ScannerApp;
pub use config::AppConfig;
pub use error::AppError;
