//! Cleanup command - compress stale and delete rotten result files.

use std::path::Path;
use std::time::SystemTime;

use bwscanner::retention::{RetentionAction, RetentionManager};

use super::common::{init_console_logging, load_app_config};
use crate::error::CliError;

/// Run the cleanup command once.
pub fn run(home: &Path, verbosity: u8, dry_run: bool) -> Result<(), CliError> {
    let _logging = init_console_logging(verbosity);
    let config = load_app_config(home)?;
    let manager = RetentionManager::new(&config.datadir, config.retention);
    let now = SystemTime::now();

    if dry_run {
        let (scanned, actions) = manager.plan(now);
        println!("Scanned {} result file(s) in {}", scanned, config.datadir.display());
        for action in &actions {
            match action {
                RetentionAction::Compress(path) => println!("  would compress {}", path.display()),
                RetentionAction::Delete(path) => println!("  would delete   {}", path.display()),
            }
        }
        if actions.is_empty() {
            println!("Nothing to do.");
        }
        return Ok(());
    }

    let report = manager.run_pass(now);
    println!("Scanned {} result file(s) in {}", report.scanned, config.datadir.display());
    println!("  Compressed: {}", report.compressed.len());
    println!("  Deleted:    {}", report.deleted.len());
    if !report.failed.is_empty() {
        println!("  Failed:     {}", report.failed.len());
        for path in &report.failed {
            println!("    {}", path.display());
        }
    }
    Ok(())
}
