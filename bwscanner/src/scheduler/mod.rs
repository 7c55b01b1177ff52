//! Cycle-based measurement scheduling.
//!
//! Each cycle asks the prioritizer for a batch, then lets a fixed pool of
//! workers drain it. Every worker takes one relay at a time from the shared
//! queue and measures it serially: build a path, probe it, append the
//! result. Workers share nothing mutable except the queue and the result
//! store.
//!
//! The next cycle is prioritized only once the pool has drained, so the
//! expensive ranking runs once per cycle. A relay whose attempt failed is
//! not retried within the cycle; it stays stale and is picked again first.
//!
//! A store failure stops workers from taking new relays and fails the cycle
//! after in-flight measurements finish.
//!
//! A cycle in which no measurement succeeded is followed by a pause, so a
//! broken overlay client or network does not turn the loop into a busy
//! retry of path builds.

mod worker;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::path::PathBuilder;
use crate::prioritizer::RelayPrioritizer;
use crate::prober::BandwidthProber;
use crate::relay::{NodeFeed, Relay};
use crate::store::{ProbeStatus, ResultStore, StoreError};

use worker::{measure_relay, WorkerContext};

/// Cycle-level failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A result could not be stored.
    #[error("result store failure: {0}")]
    Store(#[from] StoreError),

    /// A worker task panicked or was aborted.
    #[error("measurement worker failed: {0}")]
    Worker(String),
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Worker pool size.
    pub measurement_threads: usize,
    /// Pause after a cycle that had nothing to measure.
    pub idle_interval: Duration,
    /// Pause after a cycle in which every attempt failed.
    pub failure_pause: Duration,
    /// Scanner nickname written into every result.
    pub scanner: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            measurement_threads: 3,
            idle_interval: Duration::from_secs(60),
            failure_pause: Duration::from_secs(60),
            scanner: "IDidntEditTheConfig".to_string(),
        }
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Relays in the prioritized batch.
    pub selected: usize,
    /// Results recorded, per status.
    pub statuses: BTreeMap<ProbeStatus, usize>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn measured(&self) -> usize {
        self.statuses.values().sum()
    }

    pub fn successes(&self) -> usize {
        self.statuses
            .get(&ProbeStatus::Success)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        self.selected == 0
    }

    /// True if relays were attempted and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.is_idle() && self.successes() == 0
    }
}

/// Owns the worker pool and drives measurement cycles.
pub struct MeasurementScheduler {
    config: SchedulerConfig,
    feed: Arc<dyn NodeFeed>,
    prioritizer: RelayPrioritizer,
    ctx: Arc<WorkerContext>,
}

impl MeasurementScheduler {
    pub fn new(
        config: SchedulerConfig,
        feed: Arc<dyn NodeFeed>,
        prioritizer: RelayPrioritizer,
        builder: Arc<dyn PathBuilder>,
        prober: BandwidthProber,
        store: Arc<ResultStore>,
    ) -> Self {
        let ctx = Arc::new(WorkerContext {
            builder,
            prober: Arc::new(prober),
            store,
            scanner: config.scanner.clone(),
        });
        Self {
            config,
            feed,
            prioritizer,
            ctx,
        }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.ctx.store
    }

    /// Prioritize once and measure the whole batch.
    pub async fn run_cycle(&self) -> Result<CycleReport, SchedulerError> {
        let started = Instant::now();
        let now = Utc::now();
        let relays = Arc::new(self.feed.relays());
        self.ctx.store.trim(now);

        let batch: VecDeque<Relay> = self
            .prioritizer
            .best_priority(&relays, &self.ctx.store, now)
            .into_iter()
            .map(|entry| entry.relay)
            .collect();
        let mut report = CycleReport {
            selected: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        let workers = self.config.measurement_threads.clamp(1, batch.len());
        info!(batch = batch.len(), workers, "Cycle starting");

        let queue = Arc::new(Mutex::new(batch));
        let halt = CancellationToken::new();
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&self.ctx);
            let relays = Arc::clone(&relays);
            let halt = halt.clone();
            set.spawn(async move {
                let mut statuses = Vec::new();
                while !halt.is_cancelled() {
                    let next = queue.lock().pop_front();
                    let Some(relay) = next else {
                        break;
                    };
                    match measure_relay(&ctx, &relay, &relays).await {
                        Ok(status) => statuses.push(status),
                        Err(e) => {
                            halt.cancel();
                            return (statuses, Some(e));
                        }
                    }
                }
                (statuses, None)
            });
        }

        let mut failure: Option<SchedulerError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((statuses, worker_error)) => {
                    for status in statuses {
                        *report.statuses.entry(status).or_insert(0) += 1;
                    }
                    if let Some(e) = worker_error {
                        failure.get_or_insert(e);
                    }
                }
                Err(e) => {
                    halt.cancel();
                    failure.get_or_insert(SchedulerError::Worker(e.to_string()));
                }
            }
        }
        report.elapsed = started.elapsed();

        if let Some(e) = failure {
            error!(error = %e, measured = report.measured(), "Cycle aborted");
            return Err(e);
        }
        info!(
            selected = report.selected,
            measured = report.measured(),
            successes = report.successes(),
            elapsed_secs = report.elapsed.as_secs(),
            "Cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until `shutdown` is cancelled. A cycle in progress always
    /// runs to completion. Returns the number of cycles run.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<u64, SchedulerError> {
        info!(
            workers = self.config.measurement_threads,
            "Measurement scheduler starting"
        );
        let mut cycles = 0u64;
        while !shutdown.is_cancelled() {
            let report = self.run_cycle().await?;
            cycles += 1;
            let pause = if report.is_idle() {
                info!(
                    idle_secs = self.config.idle_interval.as_secs(),
                    "Nothing to measure, waiting"
                );
                self.config.idle_interval
            } else if report.all_failed() {
                warn!(
                    attempted = report.measured(),
                    pause_secs = self.config.failure_pause.as_secs(),
                    "No measurement succeeded, pausing"
                );
                self.config.failure_pause
            } else {
                continue;
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!(cycles, "Measurement scheduler stopped");
        Ok(cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{BoxFuture, MeasurementPath, PathError, TransportError};
    use crate::prioritizer::PrioritizerConfig;
    use crate::prober::ProbeSettings;
    use crate::relay::StaticNodeFeed;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Instant path serving everything at once.
    struct InstantPath;

    impl MeasurementPath for InstantPath {
        fn destination_url(&self) -> &str {
            "https://dest.example/f"
        }

        fn content_length(&self) -> u64 {
            1 << 30
        }

        fn fetch_range(&self, _start: u64, len: u64) -> BoxFuture<'_, Result<u64, TransportError>> {
            Box::pin(async move { Ok(len) })
        }
    }

    /// Fails builds for fingerprints in `failing`; tracks peak concurrency.
    struct CountingBuilder {
        failing: HashSet<String>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingBuilder {
        fn new(failing: &[String]) -> Self {
            Self {
                failing: failing.iter().cloned().collect(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl PathBuilder for CountingBuilder {
        fn build<'a>(
            &'a self,
            relay: &'a Relay,
            _relays: &'a [Relay],
        ) -> BoxFuture<'a, Result<Box<dyn MeasurementPath>, PathError>> {
            Box::pin(async move {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                if self.failing.contains(&relay.fingerprint) {
                    Err(PathError::Failed {
                        fingerprint: relay.fingerprint.clone(),
                        reason: "refused".into(),
                    })
                } else {
                    Ok(Box::new(InstantPath) as Box<dyn MeasurementPath>)
                }
            })
        }
    }

    fn relays(n: u8) -> Vec<Relay> {
        (0..n)
            .map(|i| Relay::new(format!("{:02X}", i).repeat(20), format!("r{}", i), "10.0.0.1"))
            .collect()
    }

    /// Every download counts at once with a zero `min` threshold.
    fn fast_prober() -> BandwidthProber {
        let mut settings = ProbeSettings {
            num_rtts: 1,
            num_downloads: 1,
            ..ProbeSettings::default()
        };
        settings.thresholds.toofast = 0.0;
        settings.thresholds.min = 0.0;
        BandwidthProber::new(settings)
    }

    fn scheduler(
        dir: &std::path::Path,
        relays: Vec<Relay>,
        builder: Arc<CountingBuilder>,
        threads: usize,
    ) -> MeasurementScheduler {
        let store = Arc::new(ResultStore::open(dir, 5, Utc::now()).unwrap());
        MeasurementScheduler::new(
            SchedulerConfig {
                measurement_threads: threads,
                idle_interval: Duration::from_secs(60),
                failure_pause: Duration::from_secs(60),
                scanner: "test".into(),
            },
            Arc::new(StaticNodeFeed::new(relays)),
            RelayPrioritizer::new(PrioritizerConfig {
                fraction_relays: 1.0,
                min_relays: 1,
                measure_authorities: false,
            }),
            builder,
            fast_prober(),
            store,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_measures_batch_with_bounded_pool() {
        let dir = tempfile::tempdir().unwrap();
        let builder = Arc::new(CountingBuilder::new(&[]));
        let scheduler = scheduler(dir.path(), relays(10), Arc::clone(&builder), 3);

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.selected, 10);
        assert_eq!(report.successes(), 10);
        assert_eq!(builder.peak.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.store().relay_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let all = relays(4);
        let builder = Arc::new(CountingBuilder::new(&[all[1].fingerprint.clone()]));
        let scheduler = scheduler(dir.path(), all.clone(), builder, 2);

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.measured(), 4);
        assert_eq!(report.successes(), 3);
        assert_eq!(report.statuses.get(&ProbeStatus::BuildError), Some(&1));

        // The failed relay is the only stale one and leads the next cycle.
        let last = scheduler.store().last_success_times(Utc::now());
        assert!(!last.contains_key(&all[1].fingerprint));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_feed_is_idle_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), vec![], Arc::new(CountingBuilder::new(&[])), 3);
        let report = scheduler.run_cycle().await.unwrap();
        assert!(report.is_idle());
        assert_eq!(report.measured(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_while_idle() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), vec![], Arc::new(CountingBuilder::new(&[])), 1);
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            trigger.cancel();
        });
        let cycles = scheduler.run(shutdown).await.unwrap();
        assert_eq!(cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_pauses_after_all_builds_fail() {
        let dir = tempfile::tempdir().unwrap();
        let all = relays(10);
        let failing: Vec<String> = all.iter().map(|r| r.fingerprint.clone()).collect();
        let scheduler = scheduler(dir.path(), all, Arc::new(CountingBuilder::new(&failing)), 10);
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(600)).await;
            trigger.cancel();
        });
        // Each cycle takes one 50ms build plus the 60s pause.
        let cycles = scheduler.run(shutdown).await.unwrap();
        assert_eq!(cycles, 10);
        assert_eq!(scheduler.store().relay_count(), 10);
    }

    #[test]
    fn test_all_failed_needs_attempts() {
        let mut report = CycleReport::default();
        assert!(!report.all_failed());
        report.selected = 2;
        report.statuses.insert(ProbeStatus::BuildError, 2);
        assert!(report.all_failed());
        report.statuses.insert(ProbeStatus::Success, 1);
        assert!(!report.all_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_fails_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let datadir = dir.path().join("data");
        let builder = Arc::new(CountingBuilder::new(&[]));
        let scheduler = scheduler(&datadir, relays(6), builder, 2);

        // Replace the data directory with a file so appends fail.
        std::fs::remove_dir_all(&datadir).unwrap();
        std::fs::write(&datadir, "blocked").unwrap();

        let err = scheduler.run_cycle().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Store(_)));
    }
}
