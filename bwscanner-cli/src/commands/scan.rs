//! Scan command - measure relays until interrupted.

use std::path::Path;

use bwscanner::app::ScannerApp;
use tokio_util::sync::CancellationToken;

use super::common::{init_configured_logging, load_app_config};
use crate::error::CliError;

/// Run the scan command.
///
/// Blocks until Ctrl+C; the cycle in progress finishes before exiting.
pub fn run(home: &Path, verbosity: u8) -> Result<(), CliError> {
    let config = load_app_config(home)?;
    let _logging = init_configured_logging(&config, verbosity);

    println!("bwscanner {}", bwscanner::VERSION);
    println!("  Scanner:      {}", config.scheduler.scanner);
    println!("  Results:      {}", config.datadir.display());
    println!("  Relay list:   {}", config.relays_file.display());
    println!("  Threads:      {}", config.scheduler.measurement_threads);
    println!();
    println!("Press Ctrl+C to stop after the current cycle.");
    println!();

    let app = ScannerApp::open(config)?;

    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || {
        if !handler_token.is_cancelled() {
            eprintln!("\nStopping after the current cycle...");
        }
        handler_token.cancel();
    })
    .map_err(|e| CliError::Runtime(format!("Failed to set signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(format!("Failed to start async runtime: {}", e)))?;

    let cycles = runtime.block_on(app.run(shutdown))?;
    tracing::info!(cycles, "Scan finished");
    println!("Scan stopped after {} cycle(s).", cycles);
    Ok(())
}
