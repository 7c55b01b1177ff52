//! Probe result types.
//!
//! A [`ProbeResult`] is created exactly once per completed probe attempt and
//! is never modified afterwards. Results are serialized as one JSON object
//! per line; the `version` field guards against reading lines written by an
//! incompatible scanner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::CircuitHops;
use crate::relay::Relay;

/// Current on-disk result format version.
pub const RESULT_VERSION: u32 = 2;

/// Terminal status of a probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeStatus {
    /// All RTT and download samples were collected.
    Success,
    /// Path build exceeded the circuit timeout.
    BuildTimeout,
    /// Path build failed for any other reason.
    BuildError,
    /// The absolute download-phase budget ran out.
    ProbeTimeout,
    /// A request in the RTT or download phase failed or timed out.
    TransferError,
}

impl ProbeStatus {
    pub const ALL: [ProbeStatus; 5] = [
        ProbeStatus::Success,
        ProbeStatus::BuildTimeout,
        ProbeStatus::BuildError,
        ProbeStatus::ProbeTimeout,
        ProbeStatus::TransferError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::BuildTimeout => "build-timeout",
            ProbeStatus::BuildError => "build-error",
            ProbeStatus::ProbeTimeout => "probe-timeout",
            ProbeStatus::TransferError => "transfer-error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeStatus::Success)
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted download sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownloadSample {
    /// Bytes asked for in the range request.
    pub requested: u64,
    /// Bytes actually received.
    pub received: u64,
    /// Elapsed wall time in seconds.
    pub duration: f64,
}

impl DownloadSample {
    pub fn new(requested: u64, received: u64, duration: f64) -> Self {
        Self {
            requested,
            received,
            duration,
        }
    }

    /// Bytes per second, or `None` for a non-positive duration.
    pub fn throughput(&self) -> Option<f64> {
        if self.duration > 0.0 && self.duration.is_finite() {
            Some(self.received as f64 / self.duration)
        } else {
            None
        }
    }
}

/// The outcome of one probe attempt against one relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub version: u32,
    pub fingerprint: String,
    pub nickname: String,
    pub address: String,
    pub time: DateTime<Utc>,
    /// Nickname of the scanner that produced the result.
    pub scanner: String,
    /// Hop fingerprints the probe travelled over, target first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub circuit: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_url: Option<String>,
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Round-trip times in seconds; `None` marks a failed round trip.
    #[serde(default)]
    pub rtts: Vec<Option<f64>>,
    #[serde(default)]
    pub downloads: Vec<DownloadSample>,
    /// Samples thrown away as too fast or too slow.
    #[serde(default)]
    pub discarded: u32,
}

impl ProbeResult {
    /// Start a result for `relay` with no samples.
    pub fn new(
        relay: &Relay,
        scanner: impl Into<String>,
        time: DateTime<Utc>,
        status: ProbeStatus,
    ) -> Self {
        Self {
            version: RESULT_VERSION,
            fingerprint: relay.fingerprint.clone(),
            nickname: relay.nickname.clone(),
            address: relay.address.clone(),
            time,
            scanner: scanner.into(),
            circuit: Vec::new(),
            dest_url: None,
            status,
            msg: None,
            rtts: Vec::new(),
            downloads: Vec::new(),
            discarded: 0,
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_circuit(mut self, hops: &CircuitHops) -> Self {
        self.circuit = hops.fingerprints().iter().map(|fp| fp.to_string()).collect();
        self
    }

    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.dest_url = Some(url.into());
        self
    }

    pub fn with_samples(
        mut self,
        rtts: Vec<Option<f64>>,
        downloads: Vec<DownloadSample>,
        discarded: u32,
    ) -> Self {
        self.rtts = rtts;
        self.downloads = downloads;
        self.discarded = discarded;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Per-sample throughputs in bytes per second.
    pub fn throughputs(&self) -> impl Iterator<Item = f64> + '_ {
        self.downloads.iter().filter_map(DownloadSample::throughput)
    }

    /// Round trips that completed.
    pub fn completed_rtts(&self) -> impl Iterator<Item = f64> + '_ {
        self.rtts.iter().flatten().copied()
    }
}
