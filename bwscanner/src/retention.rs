//! Result file retention.
//!
//! Every result file moves through three states by age since its last
//! write (file mtime):
//!
//! - **Fresh** (`age < stale_days`): left alone.
//! - **Stale** (`stale_days <= age < rotten_days`): gzip-compressed in place.
//! - **Rotten** (`age >= rotten_days`): deleted.
//!
//! Compression keeps the original mtime, so a compressed file keeps ageing
//! toward deletion. A compressed file is never decompressed; if the plain
//! file is written again after compression, the next stale pass appends it
//! to the existing archive as another gzip member.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{COMPRESSED_EXTENSION, RESULT_EXTENSION};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

fn result_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}.*\.txt(\.gz)?$").expect("static regex")
    })
}

/// Retention thresholds in days; `stale_days < rotten_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    pub stale_days: u32,
    pub rotten_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            stale_days: 10,
            rotten_days: 90,
        }
    }
}

/// Age-derived state of a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetentionState {
    Fresh,
    Stale,
    Rotten,
}

impl RetentionState {
    pub fn for_age(age: Duration, config: &RetentionConfig) -> Self {
        let days = age.as_secs() / SECS_PER_DAY;
        if days >= u64::from(config.rotten_days) {
            RetentionState::Rotten
        } else if days >= u64::from(config.stale_days) {
            RetentionState::Stale
        } else {
            RetentionState::Fresh
        }
    }
}

/// What a pass will do to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionAction {
    Compress(PathBuf),
    Delete(PathBuf),
}

impl RetentionAction {
    pub fn path(&self) -> &Path {
        match self {
            RetentionAction::Compress(p) | RetentionAction::Delete(p) => p,
        }
    }
}

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionReport {
    pub scanned: usize,
    pub compressed: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Applies the retention lifecycle to the result files of a data directory.
#[derive(Debug, Clone)]
pub struct RetentionManager {
    config: RetentionConfig,
    datadir: PathBuf,
}

impl RetentionManager {
    pub fn new(datadir: impl Into<PathBuf>, config: RetentionConfig) -> Self {
        Self {
            config,
            datadir: datadir.into(),
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Result files in the data directory and one level below it.
    pub fn result_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let Ok(entries) = fs::read_dir(&self.datadir) else {
            return files;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Ok(inner) = fs::read_dir(&path) {
                    files.extend(inner.flatten().map(|e| e.path()).filter(|p| is_result_file(p)));
                }
            } else if is_result_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        files
    }

    /// Decide what a pass at `now` would do, without touching anything.
    pub fn plan(&self, now: SystemTime) -> (usize, Vec<RetentionAction>) {
        let files = self.result_files();
        let mut actions = Vec::new();
        for path in &files {
            let modified = match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read file age");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            match RetentionState::for_age(age, &self.config) {
                RetentionState::Fresh => {}
                RetentionState::Stale if !is_compressed(path) => {
                    actions.push(RetentionAction::Compress(path.clone()))
                }
                RetentionState::Stale => {}
                RetentionState::Rotten => actions.push(RetentionAction::Delete(path.clone())),
            }
        }
        (files.len(), actions)
    }

    /// Run one pass. Per-file failures are logged and reported, not raised.
    pub fn run_pass(&self, now: SystemTime) -> RetentionReport {
        let (scanned, actions) = self.plan(now);
        let mut report = RetentionReport {
            scanned,
            ..RetentionReport::default()
        };

        for action in actions {
            match &action {
                RetentionAction::Compress(path) => match compress_in_place(path) {
                    Ok(archive) => {
                        debug!(path = %path.display(), archive = %archive.display(), "Compressed stale result file");
                        report.compressed.push(path.clone());
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to compress result file");
                        report.failed.push(path.clone());
                    }
                },
                RetentionAction::Delete(path) => match fs::remove_file(path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Deleted rotten result file");
                        report.deleted.push(path.clone());
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to delete result file");
                        report.failed.push(path.clone());
                    }
                },
            }
        }

        info!(
            scanned = report.scanned,
            compressed = report.compressed.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Retention pass complete"
        );
        report
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == COMPRESSED_EXTENSION)
}

fn is_result_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| result_file_pattern().is_match(n))
}

fn archive_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(COMPRESSED_EXTENSION);
    PathBuf::from(name)
}

/// Compress `path` to `path.gz`, appending to an existing archive as a new
/// gzip member. The archive takes over the original mtime.
fn compress_in_place(path: &Path) -> io::Result<PathBuf> {
    debug_assert!(path.extension().is_some_and(|e| e == RESULT_EXTENSION));
    let archive = archive_path(path);
    let mtime = FileTime::from_last_modification_time(&fs::metadata(path)?);
    let contents = fs::read(path)?;

    let mut tmp_name = archive.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let write = || -> io::Result<()> {
        let mut out = File::create(&tmp)?;
        if archive.exists() {
            out.write_all(&fs::read(&archive)?)?;
        }
        let mut encoder = GzEncoder::new(out, Compression::default());
        encoder.write_all(&contents)?;
        encoder.finish()?.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, &archive)?;
    filetime::set_file_mtime(&archive, mtime)?;
    fs::remove_file(path)?;
    Ok(archive)
}

/// Runs retention passes on a fixed interval until shutdown.
pub struct RetentionDaemon {
    manager: Arc<RetentionManager>,
    interval: Duration,
}

impl RetentionDaemon {
    pub fn new(manager: RetentionManager, interval: Duration) -> Self {
        Self {
            manager: Arc::new(manager),
            interval,
        }
    }

    /// Pass immediately, then once per interval. Returns the number of passes.
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        info!(interval_secs = self.interval.as_secs(), "Retention daemon starting");
        let mut passes = 0u64;
        loop {
            let manager = Arc::clone(&self.manager);
            match tokio::task::spawn_blocking(move || manager.run_pass(SystemTime::now())).await {
                Ok(_) => passes += 1,
                Err(e) => warn!(error = %e, "Retention pass panicked"),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!(passes, "Retention daemon stopped");
        passes
    }
}
