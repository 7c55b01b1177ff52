//! bwscanner CLI - Command-line interface
//!
//! Runs the relay bandwidth scanner and the offline tools around its result
//! directory: weight file generation, retention cleanup and statistics.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use commands::common::resolve_home;
use commands::generate::GenerateArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "bwscanner")]
#[command(version, about = "Relay bandwidth scanner", long_about = None)]
struct Cli {
    /// Scanner home directory (defaults to ~/.bwscanner)
    #[arg(short = 'd', long, global = true)]
    home: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the home directory with a default configuration
    Init,

    /// Measure relays until interrupted
    Scan,

    /// Write the bandwidth weight file from fresh results
    Generate(GenerateArgs),

    /// Compress stale and delete rotten result files
    Cleanup {
        /// Show what would be done without touching any file
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize the fresh results
    Stats {
        /// Break failures down by status
        #[arg(long)]
        error_types: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let home = resolve_home(cli.home);

    let result: Result<(), CliError> = match cli.command {
        Commands::Init => commands::init::run(&home),
        Commands::Scan => commands::scan::run(&home, cli.verbose),
        Commands::Generate(args) => commands::generate::run(&home, cli.verbose, args),
        Commands::Cleanup { dry_run } => commands::cleanup::run(&home, cli.verbose, dry_run),
        Commands::Stats { error_types } => commands::stats::run(&home, cli.verbose, error_types),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
