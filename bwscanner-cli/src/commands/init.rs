//! Init command - create a home directory with a default configuration.

use std::fs;
use std::path::Path;

use bwscanner::config::ConfigFile;

use crate::error::CliError;

/// Run the init command.
///
/// An existing configuration is never overwritten.
pub fn run(home: &Path) -> Result<(), CliError> {
    if ConfigFile::is_initialized(home) {
        println!(
            "Configuration already exists: {}",
            ConfigFile::path_in(home).display()
        );
        return Ok(());
    }

    let config = ConfigFile::with_home(home);
    let path = config.save()?;
    fs::create_dir_all(&config.paths.datadir).map_err(|e| {
        CliError::Config(format!(
            "Failed to create {}: {}",
            config.paths.datadir.display(),
            e
        ))
    })?;

    println!("Configuration file: {}", path.display());
    println!("Results directory:  {}", config.paths.datadir.display());
    println!();
    println!("Edit the configuration before scanning:");
    println!("  - set [scanner] nickname to identify this scanner");
    println!("  - set [destinations] urls to servers hosting large files");
    println!(
        "  - keep {} updated with the running relay list",
        config.paths.relays_file.display()
    );
    Ok(())
}
