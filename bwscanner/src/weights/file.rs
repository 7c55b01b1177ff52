//! Weight file format and atomic publication.
//!
//! ```text
//! 1717243200
//! version=1.1.0
//! software=bwscanner
//! software_version=0.1.0
//! generator_started=2024-06-01T10:00:00
//! earliest_bandwidth=2024-05-27T12:00:00
//! latest_bandwidth=2024-06-01T11:59:00
//! =====
//! node_id=$AAAA... bw=1024 nick=relay1 rtt=380 time=1717243140
//! ```

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Weight file format version.
pub const WEIGHT_FILE_VERSION: &str = "1.1.0";

/// Software name written in the header.
pub const SOFTWARE_NAME: &str = "bwscanner";

/// Line ending the header.
pub const HEADER_TERMINATOR: &str = "=====";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Errors raised while publishing a weight file.
#[derive(Debug, Error)]
pub enum WeightFileError {
    #[error("failed to write weight file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

pub(crate) fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Weight file header.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightFileHeader {
    pub generated_at: DateTime<Utc>,
    pub software_version: String,
    pub generator_started: Option<DateTime<Utc>>,
    pub earliest_bandwidth: Option<DateTime<Utc>>,
    pub latest_bandwidth: Option<DateTime<Utc>>,
}

impl fmt::Display for WeightFileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.generated_at.timestamp())?;
        writeln!(f, "version={}", WEIGHT_FILE_VERSION)?;
        writeln!(f, "software={}", SOFTWARE_NAME)?;
        writeln!(f, "software_version={}", self.software_version)?;
        for (key, value) in [
            ("generator_started", self.generator_started),
            ("earliest_bandwidth", self.earliest_bandwidth),
            ("latest_bandwidth", self.latest_bandwidth),
        ] {
            if let Some(time) = value {
                writeln!(f, "{}={}", key, format_timestamp(time))?;
            }
        }
        writeln!(f, "{}", HEADER_TERMINATOR)
    }
}

/// One relay's published entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLine {
    pub fingerprint: String,
    /// Bandwidth in KiB/s, at least 1.
    pub bw: u64,
    pub nickname: String,
    /// Median round trip in milliseconds.
    pub rtt_ms: Option<u64>,
    /// Unix time of the newest result used.
    pub time: i64,
}

impl fmt::Display for RelayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node_id=${} bw={} nick={}",
            self.fingerprint, self.bw, self.nickname
        )?;
        if let Some(rtt) = self.rtt_ms {
            write!(f, " rtt={}", rtt)?;
        }
        write!(f, " time={}", self.time)
    }
}

/// A complete weight file; always regenerated as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightFile {
    pub header: WeightFileHeader,
    pub lines: Vec<RelayLine>,
}

impl WeightFile {
    /// Order lines by bandwidth descending, fingerprint ascending.
    pub fn sort_lines(&mut self) {
        self.lines
            .sort_by(|a, b| b.bw.cmp(&a.bw).then_with(|| a.fingerprint.cmp(&b.fingerprint)));
    }

    /// Rescale bandwidths so they sum to `scale_constant × lines`.
    pub fn scale(&mut self, scale_constant: u64) {
        let total: u128 = self.lines.iter().map(|l| u128::from(l.bw)).sum();
        if total == 0 {
            return;
        }
        let budget = u128::from(scale_constant) * self.lines.len() as u128;
        for line in &mut self.lines {
            let scaled = (u128::from(line.bw) * budget + total / 2) / total;
            line.bw = u64::try_from(scaled).unwrap_or(u64::MAX).max(1);
        }
        self.sort_lines();
    }

    /// Write to `path` through a temporary file and rename, so readers see
    /// either the previous file or the new one.
    pub fn write_atomic(&self, path: &Path) -> Result<(), WeightFileError> {
        let err = |source| WeightFileError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(err)?;
        }
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(self.to_string().as_bytes())?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(err(e));
        }
        fs::rename(&tmp, path).map_err(err)
    }
}

impl fmt::Display for WeightFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Record when the scanner started, for the `generator_started` header.
pub fn write_started(path: &Path, started: DateTime<Utc>) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", format_timestamp(started)))
}

/// Read the scanner start time; `None` if absent or unparsable.
pub fn read_started(path: &Path) -> Option<DateTime<Utc>> {
    let text = fs::read_to_string(path).ok()?;
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}
