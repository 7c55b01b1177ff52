//! Node feed implementations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use super::{is_valid_fingerprint, NodeFeed, Relay};

/// How long a loaded relay list is reused before the file is read again.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Errors raised while reading a relay list.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read relay list {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse relay list {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

/// A fixed relay list.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeFeed {
    relays: Vec<Relay>,
}

impl StaticNodeFeed {
    pub fn new(relays: Vec<Relay>) -> Self {
        Self { relays }
    }
}

impl NodeFeed for StaticNodeFeed {
    fn relays(&self) -> Vec<Relay> {
        self.relays.clone()
    }
}

#[derive(Debug)]
struct Snapshot {
    loaded_at: Instant,
    relays: Vec<Relay>,
}

/// A relay list read from a JSON file kept up to date by the overlay client.
///
/// The file holds a JSON array of relays. It is re-read at most once per
/// refresh interval; if a reload fails, the last good snapshot is served.
#[derive(Debug)]
pub struct FileNodeFeed {
    path: PathBuf,
    refresh_interval: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl FileNodeFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_refresh_interval(path, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(path: impl Into<PathBuf>, refresh_interval: Duration) -> Self {
        Self {
            path: path.into(),
            refresh_interval,
            snapshot: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and filter the relay list from disk.
    pub fn load(&self) -> Result<Vec<Relay>, FeedError> {
        let text = fs::read_to_string(&self.path).map_err(|source| FeedError::Read {
            path: self.path.clone(),
            source,
        })?;
        let parsed: Vec<Relay> = serde_json::from_str(&text).map_err(|e| FeedError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let total = parsed.len();
        let mut relays = Vec::with_capacity(total);
        for mut relay in parsed {
            relay.fingerprint = relay.fingerprint.to_ascii_uppercase();
            if !is_valid_fingerprint(&relay.fingerprint) {
                warn!(fingerprint = %relay.fingerprint, "Ignoring relay with malformed fingerprint");
                continue;
            }
            if relay.flags.running {
                relays.push(relay);
            }
        }
        debug!(
            path = %self.path.display(),
            total,
            running = relays.len(),
            "Loaded relay list"
        );
        Ok(relays)
    }
}

impl NodeFeed for FileNodeFeed {
    fn relays(&self) -> Vec<Relay> {
        let mut snapshot = self.snapshot.lock();
        let fresh = snapshot
            .as_ref()
            .is_some_and(|s| s.loaded_at.elapsed() < self.refresh_interval);
        if !fresh {
            match self.load() {
                Ok(relays) => {
                    *snapshot = Some(Snapshot {
                        loaded_at: Instant::now(),
                        relays,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Relay list refresh failed, keeping previous snapshot");
                }
            }
        }
        snapshot
            .as_ref()
            .map(|s| s.relays.clone())
            .unwrap_or_default()
    }
}
