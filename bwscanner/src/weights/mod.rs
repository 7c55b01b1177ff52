//! Weight file generation.
//!
//! The generator reads every result inside the validity window, keeps the
//! successful ones, and folds each relay's download samples into one
//! bandwidth value with a [`BandwidthAggregator`]. Relays without a single
//! usable sample in the window are left out of the file entirely.
//!
//! Generation is a pure function of the store contents and the supplied
//! time, so two runs over an unchanged store at the same time produce
//! byte-identical files.

mod aggregate;
mod file;

pub use aggregate::{AggregatePolicy, BandwidthAggregator, FilteredMean, Median};
pub use file::{
    read_started, write_started, RelayLine, WeightFile, WeightFileError, WeightFileHeader,
    HEADER_TERMINATOR, SOFTWARE_NAME, WEIGHT_FILE_VERSION,
};

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::store::{ProbeResult, ResultStore};

/// Default per-line budget when scaling.
pub const DEFAULT_SCALE_CONSTANT: u64 = 7500;

/// Generator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Rescale bandwidths to `scale_constant × lines` in total.
    pub scale: bool,
    pub scale_constant: u64,
    /// Scanner start time for the header.
    pub started: Option<DateTime<Utc>>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            scale: false,
            scale_constant: DEFAULT_SCALE_CONSTANT,
            started: None,
        }
    }
}

/// Builds weight files from the result store.
#[derive(Debug, Clone)]
pub struct WeightFileGenerator {
    config: GeneratorConfig,
    aggregator: Arc<dyn BandwidthAggregator>,
}

impl WeightFileGenerator {
    pub fn new(config: GeneratorConfig, aggregator: Arc<dyn BandwidthAggregator>) -> Self {
        Self { config, aggregator }
    }

    pub fn aggregator(&self) -> &dyn BandwidthAggregator {
        self.aggregator.as_ref()
    }

    /// Build the weight file as of `now`.
    pub fn generate_at(&self, store: &ResultStore, now: DateTime<Utc>) -> WeightFile {
        let windowed = store.windowed_results(now);
        let mut lines = Vec::new();
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for results in windowed.values() {
            let successes: Vec<&ProbeResult> =
                results.iter().filter(|r| r.is_success()).collect();
            let Some(line) = self.relay_line(&successes) else {
                continue;
            };
            for r in &successes {
                earliest = Some(earliest.map_or(r.time, |e| e.min(r.time)));
                latest = Some(latest.map_or(r.time, |l| l.max(r.time)));
            }
            lines.push(line);
        }

        let mut weight_file = WeightFile {
            header: WeightFileHeader {
                generated_at: now,
                software_version: crate::VERSION.to_string(),
                generator_started: self.config.started,
                earliest_bandwidth: earliest,
                latest_bandwidth: latest,
            },
            lines,
        };
        weight_file.sort_lines();
        if self.config.scale {
            weight_file.scale(self.config.scale_constant);
        }

        info!(
            relays = windowed.len(),
            lines = weight_file.lines.len(),
            aggregate = self.aggregator.name(),
            scaled = self.config.scale,
            "Weight file generated"
        );
        weight_file
    }

    /// Generate as of `now` and publish atomically at `output`.
    pub fn write(
        &self,
        store: &ResultStore,
        output: &Path,
        now: DateTime<Utc>,
    ) -> Result<WeightFile, WeightFileError> {
        let weight_file = self.generate_at(store, now);
        weight_file.write_atomic(output)?;
        info!(path = %output.display(), lines = weight_file.lines.len(), "Weight file written");
        Ok(weight_file)
    }

    /// One relay's line from its successful results, or `None` without samples.
    fn relay_line(&self, successes: &[&ProbeResult]) -> Option<RelayLine> {
        let newest = successes.iter().max_by_key(|r| r.time)?;
        let throughputs: Vec<f64> = successes.iter().flat_map(|r| r.throughputs()).collect();
        let bandwidth = self.aggregator.aggregate(&throughputs)?;

        let rtts: Vec<f64> = successes.iter().flat_map(|r| r.completed_rtts()).collect();
        let rtt_ms = Median
            .aggregate(&rtts)
            .map(|seconds| (seconds * 1000.0).round() as u64);

        Some(RelayLine {
            fingerprint: newest.fingerprint.clone(),
            bw: ((bandwidth / 1024.0).round() as u64).max(1),
            nickname: newest.nickname.clone(),
            rtt_ms,
            time: newest.time.timestamp(),
        })
    }
}
