//! Folding per-sample throughputs into one bandwidth value.
//!
//! The published value is pluggable: anything implementing
//! [`BandwidthAggregator`] can be handed to the generator. Two policies
//! ship: [`Median`] (the default) and [`FilteredMean`].

use std::fmt;
use std::sync::Arc;

/// Reduces a relay's throughput samples (bytes per second) to one value.
pub trait BandwidthAggregator: Send + Sync + fmt::Debug {
    /// Name used in logs and on the command line.
    fn name(&self) -> &'static str;

    /// `None` when there are no finite samples.
    fn aggregate(&self, samples: &[f64]) -> Option<f64>;
}

fn finite(samples: &[f64]) -> Vec<f64> {
    samples.iter().copied().filter(|s| s.is_finite()).collect()
}

fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Middle sample; the mean of the two middle samples for an even count.
#[derive(Debug, Clone, Copy, Default)]
pub struct Median;

impl BandwidthAggregator for Median {
    fn name(&self) -> &'static str {
        "median"
    }

    fn aggregate(&self, samples: &[f64]) -> Option<f64> {
        let mut values = finite(samples);
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Some((values[mid - 1] + values[mid]) / 2.0)
        } else {
            Some(values[mid])
        }
    }
}

/// Mean of the samples at or above the plain mean.
///
/// Slow outliers caused by a congested path rather than the relay pull a
/// plain mean down; this discards them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilteredMean;

impl BandwidthAggregator for FilteredMean {
    fn name(&self) -> &'static str {
        "filtered-mean"
    }

    fn aggregate(&self, samples: &[f64]) -> Option<f64> {
        let values = finite(samples);
        let plain = mean(&values)?;
        let upper: Vec<f64> = values.into_iter().filter(|v| *v >= plain).collect();
        mean(&upper)
    }
}

/// Aggregation policy selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregatePolicy {
    #[default]
    Median,
    FilteredMean,
}

impl AggregatePolicy {
    pub fn aggregator(&self) -> Arc<dyn BandwidthAggregator> {
        match self {
            AggregatePolicy::Median => Arc::new(Median),
            AggregatePolicy::FilteredMean => Arc::new(FilteredMean),
        }
    }
}

impl fmt::Display for AggregatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.aggregator().name())
    }
}
