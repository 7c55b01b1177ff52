//! Generate command - write the weight file from fresh results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bwscanner::weights::{read_started, AggregatePolicy, WeightFileGenerator};
use chrono::Utc;
use clap::{Args, ValueEnum};

use super::common::{init_console_logging, load_app_config, open_store};
use crate::error::CliError;

/// How per-relay bandwidth samples are combined.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Aggregate {
    /// Median of all successful samples
    Median,
    /// Mean of the samples at or above the plain mean
    FilteredMean,
}

impl From<Aggregate> for AggregatePolicy {
    fn from(aggregate: Aggregate) -> Self {
        match aggregate {
            Aggregate::Median => AggregatePolicy::Median,
            Aggregate::FilteredMean => AggregatePolicy::FilteredMean,
        }
    }
}

/// Arguments for `bwscanner generate`.
#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Output path (defaults to the configured v3bw file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Scale bandwidths so they sum to scale-constant times the relay count
    #[arg(long)]
    pub scale: bool,

    /// Per-relay target for --scale
    #[arg(long)]
    pub scale_constant: Option<u64>,

    /// Aggregation of throughput samples
    #[arg(long, value_enum, default_value_t = Aggregate::Median)]
    pub aggregate: Aggregate,
}

/// Run the generate command.
pub fn run(home: &Path, verbosity: u8, args: GenerateArgs) -> Result<(), CliError> {
    if args.scale_constant == Some(0) {
        return Err(CliError::Config("--scale-constant must be at least 1".to_string()));
    }
    let _logging = init_console_logging(verbosity);
    let config = load_app_config(home)?;
    let store = open_store(&config)?;

    let mut generator_config = config.generator.clone();
    generator_config.scale |= args.scale;
    if let Some(constant) = args.scale_constant {
        generator_config.scale_constant = constant;
    }
    generator_config.started = read_started(&config.started_path);

    let policy = AggregatePolicy::from(args.aggregate);
    let generator = WeightFileGenerator::new(generator_config, policy.aggregator());
    let output = args.output.unwrap_or_else(|| config.v3bw_path.clone());
    let weight_file = generator.write(&store, &output, Utc::now())?;

    println!("Weight file: {}", output.display());
    println!("  Relays:     {}", weight_file.lines.len());
    println!("  Aggregate:  {}", policy);
    if weight_file.lines.is_empty() {
        println!();
        println!("No successful measurements within the last {} day(s).", config.data_period_days);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bwscanner::config::ConfigFile;

    #[test]
    fn test_aggregate_maps_to_policy() {
        assert_eq!(AggregatePolicy::from(Aggregate::Median), AggregatePolicy::Median);
        assert_eq!(
            AggregatePolicy::from(Aggregate::FilteredMean),
            AggregatePolicy::FilteredMean
        );
    }

    #[test]
    fn test_zero_scale_constant_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        ConfigFile::with_home(dir.path()).save().unwrap();
        let output = dir.path().join("out.v3bw");
        let args = GenerateArgs {
            output: Some(output.clone()),
            scale: true,
            scale_constant: Some(0),
            aggregate: Aggregate::Median,
        };
        let err = run(dir.path(), 0, args).unwrap_err();
        assert!(matches!(err, CliError::Config(ref msg) if msg.contains("scale-constant")), "{}", err);
        assert!(!output.exists());
    }

    #[test]
    fn test_generate_on_empty_store_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        ConfigFile::with_home(dir.path()).save().unwrap();
        let output = dir.path().join("out.v3bw");
        let args = GenerateArgs {
            output: Some(output.clone()),
            scale: false,
            scale_constant: None,
            aggregate: Aggregate::Median,
        };
        run(dir.path(), 0, args).unwrap();
        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.contains("version=1.1.0"));
        assert!(text.contains("====="));
    }
}
