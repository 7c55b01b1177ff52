//! Time-windowed result store.
//!
//! The store is the single source of truth for measurement freshness. On
//! disk it is an append-only set of daily JSON-lines files; in memory it is
//! a map from relay fingerprint to the [`ResultRecord`] of results inside
//! the validity window.
//!
//! Appends may come from every measurement worker at once. They are
//! serialised by one lock that covers both the file write and the in-memory
//! update, so each line lands whole and memory never runs ahead of disk.
//!
//! # Example
//!
//! ```ignore
//! use bwscanner::store::ResultStore;
//!
//! let store = ResultStore::open("/var/lib/bwscanner/datadir", 5, chrono::Utc::now())?;
//! store.append(result)?;
//! let fresh = store.last_success_times(chrono::Utc::now());
//! ```

mod error;
mod files;
mod record;
mod result;

pub use error::{StoreError, StoreResult};
pub use files::{
    find_result_files, load_results, read_result_file, result_file_name, result_file_path,
    LoadedResults, COMPRESSED_EXTENSION, RESULT_EXTENSION,
};
pub use record::ResultRecord;
pub use result::{DownloadSample, ProbeResult, ProbeStatus, RESULT_VERSION};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Append-only, time-windowed store of probe results.
#[derive(Debug)]
pub struct ResultStore {
    datadir: PathBuf,
    data_period_days: u32,
    records: Mutex<HashMap<String, ResultRecord>>,
}

impl ResultStore {
    /// Open the store in `datadir`, creating the directory if needed and
    /// loading every result inside the window ending at `now`.
    pub fn open(
        datadir: impl Into<PathBuf>,
        data_period_days: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Self> {
        let datadir = datadir.into();
        fs::create_dir_all(&datadir).map_err(|source| StoreError::CreateDir {
            path: datadir.clone(),
            source,
        })?;

        let loaded = load_results(&datadir, data_period_days, now)?;
        if loaded.skipped > 0 {
            warn!(
                skipped = loaded.skipped,
                "Ignored malformed or incompatible result lines"
            );
        }

        let mut records: HashMap<String, ResultRecord> = HashMap::new();
        let total = loaded.results.len();
        for result in loaded.results {
            records
                .entry(result.fingerprint.clone())
                .or_default()
                .push(result);
        }
        info!(
            datadir = %datadir.display(),
            relays = records.len(),
            results = total,
            "Result store opened"
        );

        Ok(Self {
            datadir,
            data_period_days,
            records: Mutex::new(records),
        })
    }

    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    pub fn data_period_days(&self) -> u32 {
        self.data_period_days
    }

    /// Oldest timestamp still inside the window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        files::days_before(now, i64::from(self.data_period_days))
    }

    /// Persist `result` and add it to its relay's record.
    ///
    /// Safe to call from many workers at once. An error means the result
    /// was not recorded and must be treated as fatal for the cycle.
    pub fn append(&self, result: ProbeResult) -> StoreResult<()> {
        let line = serde_json::to_string(&result).map_err(|source| StoreError::Encode {
            fingerprint: result.fingerprint.clone(),
            source,
        })?;
        let path = result_file_path(&self.datadir, result.time);

        let mut records = self.records.lock();
        files::append_line(&path, &line)?;
        debug!(
            fingerprint = %result.fingerprint,
            status = %result.status,
            file = %path.display(),
            "Result appended"
        );
        records
            .entry(result.fingerprint.clone())
            .or_default()
            .push(result);
        Ok(())
    }

    /// Time of the newest successful result inside the window, per relay.
    ///
    /// Relays with no success in the window are absent.
    pub fn last_success_times(&self, now: DateTime<Utc>) -> HashMap<String, DateTime<Utc>> {
        let since = self.window_start(now);
        self.records
            .lock()
            .iter()
            .filter_map(|(fp, record)| record.last_success(since).map(|t| (fp.clone(), t)))
            .collect()
    }

    /// Every result inside the window, grouped by relay in fingerprint order.
    pub fn windowed_results(&self, now: DateTime<Utc>) -> BTreeMap<String, Vec<ProbeResult>> {
        let since = self.window_start(now);
        self.records
            .lock()
            .iter()
            .filter_map(|(fp, record)| {
                let results: Vec<ProbeResult> = record.within(since).cloned().collect();
                (!results.is_empty()).then(|| (fp.clone(), results))
            })
            .collect()
    }

    /// A copy of one relay's record.
    pub fn record(&self, fingerprint: &str) -> Option<ResultRecord> {
        self.records.lock().get(fingerprint).cloned()
    }

    /// Drop results that have aged out of the window from memory.
    pub fn trim(&self, now: DateTime<Utc>) -> usize {
        let since = self.window_start(now);
        let mut records = self.records.lock();
        let removed = records.values_mut().map(|r| r.trim(since)).sum();
        records.retain(|_, r| !r.is_empty());
        if removed > 0 {
            debug!(removed, "Trimmed aged-out results");
        }
        removed
    }

    /// Number of relays with at least one result held in memory.
    pub fn relay_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Number of results held in memory.
    pub fn result_count(&self) -> usize {
        self.records.lock().values().map(ResultRecord::len).sum()
    }
}
