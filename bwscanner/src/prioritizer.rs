//! Staleness-ordered relay selection.
//!
//! Once per scheduling cycle the prioritizer ranks every eligible relay by
//! how long ago it was last measured successfully and hands the stalest
//! slice to the scheduler. The order is a pure function of the node
//! snapshot and the result store, so a failed attempt is retried simply by
//! staying stale.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::relay::Relay;
use crate::store::ResultStore;

/// Selection policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PrioritizerConfig {
    /// Share of eligible relays measured per cycle.
    pub fraction_relays: f64,
    /// Lower bound on the batch size.
    pub min_relays: usize,
    /// Whether directory authorities are measured too.
    pub measure_authorities: bool,
}

impl Default for PrioritizerConfig {
    fn default() -> Self {
        Self {
            fraction_relays: 0.05,
            min_relays: 50,
            measure_authorities: false,
        }
    }
}

/// Time since a relay's last successful measurement.
///
/// `Never` compares greater than every measured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Staleness {
    Measured(Duration),
    Never,
}

impl Staleness {
    pub fn since(last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match last_success {
            // A success stamped in the future counts as just measured.
            Some(t) => Staleness::Measured((now - t).to_std().unwrap_or(Duration::ZERO)),
            None => Staleness::Never,
        }
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Measured(d) => write!(f, "{}s", d.as_secs()),
            Staleness::Never => f.write_str("never"),
        }
    }
}

/// A relay paired with its staleness; a derived, never-persisted view.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityEntry {
    pub relay: Relay,
    pub staleness: Staleness,
}

/// Stalest first, fingerprint ascending on ties.
fn priority_order(a: &PriorityEntry, b: &PriorityEntry) -> Ordering {
    b.staleness
        .cmp(&a.staleness)
        .then_with(|| a.relay.fingerprint.cmp(&b.relay.fingerprint))
}

/// Orders relays by staleness and picks each cycle's batch.
#[derive(Debug, Clone, Default)]
pub struct RelayPrioritizer {
    config: PrioritizerConfig,
}

impl RelayPrioritizer {
    pub fn new(config: PrioritizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrioritizerConfig {
        &self.config
    }

    /// Batch size for `eligible` relays: the configured fraction, never
    /// below `min_relays` and never above the population.
    pub fn batch_size(&self, eligible: usize) -> usize {
        let fractional = (eligible as f64 * self.config.fraction_relays).floor() as usize;
        fractional.max(self.config.min_relays).min(eligible)
    }

    /// Every eligible relay in priority order.
    ///
    /// Authorities are left out unless configured otherwise; a fingerprint
    /// listed twice is ranked once.
    pub fn rank(
        &self,
        relays: &[Relay],
        last_success: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<PriorityEntry> {
        let mut seen = HashSet::with_capacity(relays.len());
        let mut entries: Vec<PriorityEntry> = relays
            .iter()
            .filter(|r| self.config.measure_authorities || !r.is_authority())
            .filter(|r| seen.insert(r.fingerprint.as_str()))
            .map(|relay| PriorityEntry {
                staleness: Staleness::since(last_success.get(&relay.fingerprint).copied(), now),
                relay: relay.clone(),
            })
            .collect();
        entries.sort_by(priority_order);
        entries
    }

    /// The stalest batch of `relays` according to `store`.
    pub fn best_priority(
        &self,
        relays: &[Relay],
        store: &ResultStore,
        now: DateTime<Utc>,
    ) -> Vec<PriorityEntry> {
        let last_success = store.last_success_times(now);
        let mut ranked = self.rank(relays, &last_success, now);
        let eligible = ranked.len();
        let size = self.batch_size(eligible);
        ranked.truncate(size);

        let never = ranked
            .iter()
            .filter(|e| e.staleness == Staleness::Never)
            .count();
        info!(
            relays = relays.len(),
            eligible,
            batch = size,
            never_measured = never,
            "Prioritized relays"
        );
        if let Some(first) = ranked.first() {
            debug!(relay = %first.relay, staleness = %first.staleness, "Stalest relay");
        }
        ranked
    }
}
