//! Stats command - summarize the fresh results.

use std::path::Path;

use bwscanner::stats::ResultStats;
use chrono::Utc;

use super::common::{init_console_logging, load_app_config, open_store};
use crate::error::CliError;

/// Run the stats command.
pub fn run(home: &Path, verbosity: u8, error_types: bool) -> Result<(), CliError> {
    let _logging = init_console_logging(verbosity);
    let config = load_app_config(home)?;
    let store = open_store(&config)?;
    let stats = ResultStats::from_store(&store, Utc::now());
    print!("{}", stats.render(error_types));
    Ok(())
}
