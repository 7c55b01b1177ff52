//! Daily result files.
//!
//! Results are appended to `<datadir>/YYYY-MM-DD.txt`, keyed by the UTC date
//! of the result. Retention may later compress a file to `.txt.gz` or move
//! older files into a subdirectory, so loading searches both the data
//! directory and one level below it and reads either encoding.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::{StoreError, StoreResult};
use super::result::{ProbeResult, RESULT_VERSION};

/// Extension of uncompressed result files.
pub const RESULT_EXTENSION: &str = "txt";

/// Extension added when a result file is compressed.
pub const COMPRESSED_EXTENSION: &str = "gz";

/// Days of files scanned beyond the validity window, to cover results
/// written just before midnight into the previous day's file.
const EXTRA_SCAN_DAYS: i64 = 2;

/// File name holding results for `date`.
pub fn result_file_name(date: NaiveDate) -> String {
    format!("{}.{}", date.format("%Y-%m-%d"), RESULT_EXTENSION)
}

/// Path of the file a result taken at `time` belongs in.
pub fn result_file_path(datadir: &Path, time: DateTime<Utc>) -> PathBuf {
    datadir.join(result_file_name(time.date_naive()))
}

/// Append one serialized result as a single write.
pub(crate) fn append_line(path: &Path, line: &str) -> StoreResult<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(buf.as_bytes())
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Results read from one or more files.
#[derive(Debug, Default)]
pub struct LoadedResults {
    pub results: Vec<ProbeResult>,
    /// Lines that were malformed or carried another format version.
    pub skipped: usize,
}

#[derive(Deserialize)]
struct VersionTag {
    version: Option<u32>,
}

fn parse_line(line: &str) -> Option<ProbeResult> {
    let tag: VersionTag = serde_json::from_str(line).ok()?;
    if tag.version != Some(RESULT_VERSION) {
        return None;
    }
    serde_json::from_str(line).ok()
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == COMPRESSED_EXTENSION)
}

/// Read every valid result line from a plain or gzip result file.
pub fn read_result_file(path: &Path) -> StoreResult<LoadedResults> {
    let file = File::open(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn BufRead> = if is_compressed(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut loaded = LoadedResults::default();
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Result file truncated, keeping lines read so far");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_line(trimmed) {
            Some(result) => loaded.results.push(result),
            None => loaded.skipped += 1,
        }
    }
    Ok(loaded)
}

/// `days` days before `now`, saturating at the earliest representable time.
pub(crate) fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Date a result file holds, from the `YYYY-MM-DD` prefix of its name.
fn file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    NaiveDate::parse_from_str(name.get(..10)?, "%Y-%m-%d").ok()
}

/// Result files for the dates in `[first, last]`, searched in `datadir`
/// and its immediate subdirectories.
pub fn find_result_files(
    datadir: &Path,
    first: NaiveDate,
    last: NaiveDate,
) -> StoreResult<Vec<PathBuf>> {
    let base = glob::Pattern::escape(&datadir.to_string_lossy());
    let mut files = Vec::new();

    for dir in [base.clone(), format!("{}/*", base)] {
        for ext in [
            RESULT_EXTENSION.to_string(),
            format!("{}.{}", RESULT_EXTENSION, COMPRESSED_EXTENSION),
        ] {
            let pattern = format!("{}/[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*.{}", dir, ext);
            let paths = glob::glob(&pattern).map_err(|e| StoreError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            for entry in paths {
                match entry {
                    Ok(path) if path.is_file() => {
                        if file_date(&path).is_some_and(|d| d >= first && d <= last) {
                            files.push(path);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Skipping unreadable result path"),
                }
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Load every result taken since `data_period_days` before `now`, oldest
/// first.
///
/// Results stamped after `now` (clock skew) are kept, as they are in
/// memory, so a restart does not change how stale a relay looks.
pub fn load_results(
    datadir: &Path,
    data_period_days: u32,
    now: DateTime<Utc>,
) -> StoreResult<LoadedResults> {
    let days = i64::from(data_period_days);
    let since = days_before(now, days);
    let first = days_before(now, days + EXTRA_SCAN_DAYS).date_naive();
    let last = (now + Duration::days(1)).date_naive();
    let files = find_result_files(datadir, first, last)?;

    let mut loaded = LoadedResults::default();
    for path in &files {
        let file = read_result_file(path)?;
        loaded.skipped += file.skipped;
        loaded
            .results
            .extend(file.results.into_iter().filter(|r| r.time >= since));
    }
    loaded.results.sort_by_key(|r| r.time);

    debug!(
        datadir = %datadir.display(),
        files = files.len(),
        results = loaded.results.len(),
        skipped = loaded.skipped,
        "Loaded results"
    );
    Ok(loaded)
}
