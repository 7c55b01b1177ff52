//! Adaptive bandwidth probing over one built path.
//!
//! A probe attempt is a small state machine:
//!
//! ```text
//! Init ──► Rtt ──► Download ──► Done
//!           │         │
//!           └────┬────┘
//!                ▼
//!              Failed
//! ```
//!
//! The RTT phase fetches `min_download_size` bytes `num_rtts` times to
//! estimate path latency. Individual failures are recorded as gaps; the
//! attempt is abandoned once more than half of the round trips fail.
//!
//! The download phase fetches random byte ranges, resizing after every
//! sample (see [`sizing`]) until `num_downloads` samples are accepted. Any
//! failed or timed-out request ends the attempt as a transfer error; running
//! out of the absolute transfer budget ends it as a probe timeout. Samples
//! gathered before a failure are always kept in the outcome.

pub mod sizing;

pub use crate::path::TransportError;
pub use sizing::{DownloadThresholds, SampleClass, SizeBounds, SizeDecision, TOOFAST_MULTIPLIER};

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::path::MeasurementPath;
use crate::store::{DownloadSample, ProbeStatus};

/// Probe parameters, fixed for the lifetime of a prober.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub num_rtts: u32,
    pub num_downloads: u32,
    pub initial_read_request: u64,
    pub min_download_size: u64,
    pub max_download_size: u64,
    pub thresholds: DownloadThresholds,
    /// Bound on every individual request.
    pub http_timeout: Duration,
    /// Bound on the whole download phase.
    pub transfer_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            num_rtts: 10,
            num_downloads: 5,
            initial_read_request: 16384,
            min_download_size: 1,
            max_download_size: 1 << 30,
            thresholds: DownloadThresholds::default(),
            http_timeout: Duration::from_secs(10),
            transfer_timeout: Duration::from_secs(300),
        }
    }
}

impl ProbeSettings {
    pub fn size_bounds(&self) -> SizeBounds {
        SizeBounds {
            min: self.min_download_size,
            max: self.max_download_size,
        }
    }
}

/// Probe state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    Init,
    Rtt,
    Download,
    Done,
    Failed,
}

/// Everything a probe attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    /// Final phase: `Done` or `Failed`.
    pub phase: ProbePhase,
    /// Phase that was running when the attempt failed.
    pub failed_in: Option<ProbePhase>,
    pub rtts: Vec<Option<f64>>,
    pub downloads: Vec<DownloadSample>,
    pub discarded: u32,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug)]
struct ProbeFailure {
    status: ProbeStatus,
    reason: String,
}

impl ProbeFailure {
    fn transfer(reason: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::TransferError,
            reason: reason.into(),
        }
    }
}

/// Samples collected so far in one attempt.
#[derive(Debug)]
struct ProbeAttempt {
    phase: ProbePhase,
    rtts: Vec<Option<f64>>,
    downloads: Vec<DownloadSample>,
    discarded: u32,
}

impl ProbeAttempt {
    fn new() -> Self {
        Self {
            phase: ProbePhase::Init,
            rtts: Vec::new(),
            downloads: Vec::new(),
            discarded: 0,
        }
    }

    fn enter(&mut self, phase: ProbePhase) {
        trace!(from = ?self.phase, to = ?phase, "Probe phase");
        self.phase = phase;
    }

    fn finish(mut self) -> ProbeOutcome {
        self.enter(ProbePhase::Done);
        ProbeOutcome {
            status: ProbeStatus::Success,
            phase: self.phase,
            failed_in: None,
            rtts: self.rtts,
            downloads: self.downloads,
            discarded: self.discarded,
            error: None,
        }
    }

    /// Partial samples survive the failure.
    fn fail(mut self, failure: ProbeFailure) -> ProbeOutcome {
        let failed_in = self.phase;
        self.enter(ProbePhase::Failed);
        ProbeOutcome {
            status: failure.status,
            phase: self.phase,
            failed_in: Some(failed_in),
            rtts: self.rtts,
            downloads: self.downloads,
            discarded: self.discarded,
            error: Some(failure.reason),
        }
    }
}

/// Start offset for a random `len`-byte window of a `total`-byte resource,
/// and the window length actually available.
pub fn random_range(total: u64, len: u64) -> (u64, u64) {
    if len >= total {
        return (0, total.max(1));
    }
    let start = rand::rng().random_range(0..=total - len);
    (start, len)
}

/// Runs the probe protocol over built paths.
#[derive(Debug, Clone)]
pub struct BandwidthProber {
    settings: ProbeSettings,
}

impl BandwidthProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Run one complete attempt. Never fails: errors become the outcome status.
    pub async fn run(&self, path: &dyn MeasurementPath) -> ProbeOutcome {
        let mut attempt = ProbeAttempt::new();

        attempt.enter(ProbePhase::Rtt);
        if let Err(failure) = self.rtt_phase(path, &mut attempt).await {
            return attempt.fail(failure);
        }

        attempt.enter(ProbePhase::Download);
        if let Err(failure) = self.download_phase(path, &mut attempt).await {
            return attempt.fail(failure);
        }

        attempt.finish()
    }

    /// One ranged fetch bounded by `limit`; returns bytes and elapsed seconds.
    async fn timed_fetch(
        &self,
        path: &dyn MeasurementPath,
        len: u64,
        limit: Duration,
    ) -> Result<(u64, f64), TransportError> {
        let (start, len) = random_range(path.content_length(), len);
        let started = Instant::now();
        match tokio::time::timeout(limit, path.fetch_range(start, len)).await {
            Ok(Ok(received)) => Ok((received, started.elapsed().as_secs_f64())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }

    async fn rtt_phase(
        &self,
        path: &dyn MeasurementPath,
        attempt: &mut ProbeAttempt,
    ) -> Result<(), ProbeFailure> {
        let total = self.settings.num_rtts;
        let mut failures = 0u32;
        for _ in 0..total {
            match self
                .timed_fetch(path, self.settings.min_download_size, self.settings.http_timeout)
                .await
            {
                Ok((_, rtt)) => attempt.rtts.push(Some(rtt)),
                Err(e) => {
                    debug!(error = %e, "Round trip failed");
                    attempt.rtts.push(None);
                    failures += 1;
                    if failures * 2 > total {
                        return Err(ProbeFailure::transfer(format!(
                            "{} of {} round trips failed, last: {}",
                            failures, total, e
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    async fn download_phase(
        &self,
        path: &dyn MeasurementPath,
        attempt: &mut ProbeAttempt,
    ) -> Result<(), ProbeFailure> {
        let settings = &self.settings;
        let bounds = settings.size_bounds();
        let deadline = Instant::now() + settings.transfer_timeout;
        let mut size = bounds.clamp(settings.initial_read_request);

        while (attempt.downloads.len() as u32) < settings.num_downloads {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.budget_exhausted(attempt));
            }
            let budget_limited = remaining <= settings.http_timeout;
            let limit = remaining.min(settings.http_timeout);

            let (received, duration) = match self.timed_fetch(path, size, limit).await {
                Ok(sample) => sample,
                Err(TransportError::Timeout(_)) if budget_limited => {
                    return Err(self.budget_exhausted(attempt));
                }
                Err(e) => return Err(ProbeFailure::transfer(format!("download failed: {}", e))),
            };
            if received == 0 {
                return Err(ProbeFailure::transfer("download returned no data"));
            }

            let decision = sizing::evaluate_sample(size, duration, &settings.thresholds, &bounds);
            debug!(
                requested = size,
                received,
                duration_ms = (duration * 1000.0) as u64,
                class = ?decision.class,
                kept = decision.keep,
                next_size = decision.next_size,
                "Download sample"
            );
            if decision.keep {
                attempt
                    .downloads
                    .push(DownloadSample::new(size, received, duration));
            } else {
                attempt.discarded += 1;
            }
            size = decision.next_size;
        }
        Ok(())
    }

    fn budget_exhausted(&self, attempt: &ProbeAttempt) -> ProbeFailure {
        ProbeFailure {
            status: ProbeStatus::ProbeTimeout,
            reason: format!(
                "transfer budget of {}s exhausted with {} of {} samples",
                self.settings.transfer_timeout.as_secs(),
                attempt.downloads.len(),
                self.settings.num_downloads
            ),
        }
    }
}
