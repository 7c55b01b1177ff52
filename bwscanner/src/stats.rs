//! Summary statistics over the fresh results.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::store::{ProbeResult, ProbeStatus, ResultStore};

/// Counts over the results inside the validity window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStats {
    pub relays: usize,
    pub relays_with_success: usize,
    pub results: usize,
    pub by_status: BTreeMap<ProbeStatus, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl ResultStats {
    pub fn from_results(results: &BTreeMap<String, Vec<ProbeResult>>) -> Self {
        let mut stats = ResultStats {
            relays: results.len(),
            ..ResultStats::default()
        };
        for relay_results in results.values() {
            if relay_results.iter().any(ProbeResult::is_success) {
                stats.relays_with_success += 1;
            }
            for r in relay_results {
                stats.results += 1;
                *stats.by_status.entry(r.status).or_insert(0) += 1;
                stats.oldest = Some(stats.oldest.map_or(r.time, |t| t.min(r.time)));
                stats.newest = Some(stats.newest.map_or(r.time, |t| t.max(r.time)));
            }
        }
        stats
    }

    pub fn from_store(store: &ResultStore, now: DateTime<Utc>) -> Self {
        Self::from_results(&store.windowed_results(now))
    }

    pub fn successes(&self) -> usize {
        self.count(ProbeStatus::Success)
    }

    pub fn errors(&self) -> usize {
        self.results - self.successes()
    }

    pub fn count(&self, status: ProbeStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Share of all results with `status`, in percent.
    pub fn percent(&self, status: ProbeStatus) -> f64 {
        if self.results == 0 {
            0.0
        } else {
            100.0 * self.count(status) as f64 / self.results as f64
        }
    }

    /// Successful measurements per relay that has at least one.
    pub fn mean_successes_per_relay(&self) -> f64 {
        if self.relays_with_success == 0 {
            0.0
        } else {
            self.successes() as f64 / self.relays_with_success as f64
        }
    }

    /// Human-readable report; `error_types` adds the per-status breakdown.
    pub fn render(&self, error_types: bool) -> String {
        if self.results == 0 {
            return "No fresh results\n".to_string();
        }
        let mut out = String::new();
        let _ = writeln!(out, "{} relays have results", self.relays);
        let _ = writeln!(
            out,
            "{} relays have at least one successful measurement",
            self.relays_with_success
        );
        let _ = writeln!(
            out,
            "{} total results, {} successes ({:.1}%), {} errors ({:.1}%)",
            self.results,
            self.successes(),
            self.percent(ProbeStatus::Success),
            self.errors(),
            100.0 - self.percent(ProbeStatus::Success)
        );
        let _ = writeln!(
            out,
            "{:.2} successful measurements per relay on average",
            self.mean_successes_per_relay()
        );
        if let (Some(oldest), Some(newest)) = (self.oldest, self.newest) {
            let _ = writeln!(out, "Results span {} to {}", oldest, newest);
        }
        if error_types {
            for status in ProbeStatus::ALL.iter().filter(|s| !s.is_success()) {
                let _ = writeln!(
                    out,
                    "  {:<15} {:>6} ({:.1}%)",
                    status.as_str(),
                    self.count(*status),
                    self.percent(*status)
                );
            }
        }
        out
    }
}
