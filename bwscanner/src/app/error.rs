//! Application error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::path::PathError;
use crate::scheduler::SchedulerError;
use crate::store::StoreError;
use crate::weights::WeightFileError;

/// Errors raised while bootstrapping or running the scanner.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("result store error: {0}")]
    Store(#[from] StoreError),

    #[error("path builder setup failed: {0}")]
    Path(#[from] PathError),

    #[error("scanning stopped: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("weight file error: {0}")]
    WeightFile(#[from] WeightFileError),

    #[error("failed to record scanner start in {}: {source}", path.display())]
    Started { path: PathBuf, source: io::Error },
}
