//! Per-relay result history.

use chrono::{DateTime, Utc};

use super::result::ProbeResult;

/// All results for one relay that are still inside the validity window.
///
/// Only ever grows by [`push`](ResultRecord::push); [`trim`](ResultRecord::trim)
/// drops entries that have aged out of the window in memory without touching
/// the files on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRecord {
    results: Vec<ProbeResult>,
}

impl ResultRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ProbeResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results at or after `since`.
    pub fn within(&self, since: DateTime<Utc>) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(move |r| r.time >= since)
    }

    /// Time of the newest successful result at or after `since`.
    pub fn last_success(&self, since: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.within(since)
            .filter(|r| r.is_success())
            .map(|r| r.time)
            .max()
    }

    /// Drop results older than `since`; returns how many were removed.
    pub fn trim(&mut self, since: DateTime<Utc>) -> usize {
        let before = self.results.len();
        self.results.retain(|r| r.time >= since);
        before - self.results.len()
    }
}
