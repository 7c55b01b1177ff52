//! Integration tests for the measurement flow.
//!
//! These tests drive the public API end to end:
//! - relay list → prioritizer → scheduler → result store
//! - build timeouts recorded as results without stalling the cycle
//! - helper exits chosen from the relay snapshot
//! - result store → weight file
//!
//! Run with: `cargo test --test scan_integration`

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};

use bwscanner::path::{
    choose_exit, BoxFuture, CircuitHops, MeasurementPath, PathBuilder, PathError,
    TimeoutPathBuilder, TransportError,
};
use bwscanner::prioritizer::{PrioritizerConfig, RelayPrioritizer, Staleness};
use bwscanner::prober::{BandwidthProber, ProbeSettings};
use bwscanner::relay::{Relay, StaticNodeFeed};
use bwscanner::scheduler::{MeasurementScheduler, SchedulerConfig};
use bwscanner::store::{ProbeResult, ProbeStatus, ResultStore};
use bwscanner::weights::{GeneratorConfig, Median, WeightFileGenerator};

// ============================================================================
// Helper Functions
// ============================================================================

const MIB: u64 = 1 << 20;

fn fp(n: u8) -> String {
    format!("{:02X}", n).repeat(20)
}

fn relay(n: u8) -> Relay {
    Relay::new(fp(n), format!("relay{}", n), format!("10.0.0.{}", n))
}

/// Serves bytes at a fixed rate on the tokio clock.
struct RatedPath {
    rate: f64,
}

impl MeasurementPath for RatedPath {
    fn destination_url(&self) -> &str {
        "https://dest.example/bwscanner.bin"
    }

    fn content_length(&self) -> u64 {
        1 << 30
    }

    fn fetch_range(&self, _start: u64, len: u64) -> BoxFuture<'_, Result<u64, TransportError>> {
        let delay = Duration::from_secs_f64(len as f64 / self.rate);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(len)
        })
    }
}

/// Builds rated paths; builds for `hanging` relays never complete.
struct TestBuilder {
    rate: f64,
    hanging: HashSet<String>,
}

impl TestBuilder {
    fn new(rate: f64, hanging: &[String]) -> Self {
        Self {
            rate,
            hanging: hanging.iter().cloned().collect(),
        }
    }
}

impl PathBuilder for TestBuilder {
    fn build<'a>(
        &'a self,
        relay: &'a Relay,
        _relays: &'a [Relay],
    ) -> BoxFuture<'a, Result<Box<dyn MeasurementPath>, PathError>> {
        Box::pin(async move {
            if self.hanging.contains(&relay.fingerprint) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Box::new(RatedPath { rate: self.rate }) as Box<dyn MeasurementPath>)
        })
    }
}

/// A rated path over chosen hops.
struct HelperPath {
    inner: RatedPath,
    hops: CircuitHops,
}

impl MeasurementPath for HelperPath {
    fn destination_url(&self) -> &str {
        self.inner.destination_url()
    }

    fn content_length(&self) -> u64 {
        self.inner.content_length()
    }

    fn fetch_range(&self, start: u64, len: u64) -> BoxFuture<'_, Result<u64, TransportError>> {
        self.inner.fetch_range(start, len)
    }

    fn hops(&self) -> Option<&CircuitHops> {
        Some(&self.hops)
    }
}

/// Picks a helper exit for port 443 from the snapshot, then serves a
/// rated path over it.
struct HelperBuilder {
    rate: f64,
}

impl PathBuilder for HelperBuilder {
    fn build<'a>(
        &'a self,
        relay: &'a Relay,
        relays: &'a [Relay],
    ) -> BoxFuture<'a, Result<Box<dyn MeasurementPath>, PathError>> {
        Box::pin(async move {
            let hops = choose_exit(relay, relays, 443)?;
            Ok(Box::new(HelperPath {
                inner: RatedPath { rate: self.rate },
                hops,
            }) as Box<dyn MeasurementPath>)
        })
    }
}

/// Three samples of 6 MiB, acceptable at 1 MiB/s without resizing.
fn probe_settings() -> ProbeSettings {
    ProbeSettings {
        num_rtts: 2,
        num_downloads: 3,
        initial_read_request: 6 * MIB,
        min_download_size: 64 * 1024,
        max_download_size: 64 * MIB,
        ..ProbeSettings::default()
    }
}

fn scheduler(
    store: Arc<ResultStore>,
    relays: Vec<Relay>,
    builder: Arc<dyn PathBuilder>,
) -> MeasurementScheduler {
    MeasurementScheduler::new(
        SchedulerConfig {
            measurement_threads: 2,
            idle_interval: Duration::from_secs(60),
            failure_pause: Duration::from_secs(60),
            scanner: "IntegrationScanner".into(),
        },
        Arc::new(StaticNodeFeed::new(relays)),
        RelayPrioritizer::new(PrioritizerConfig {
            fraction_relays: 1.0,
            min_relays: 1,
            measure_authorities: false,
        }),
        builder,
        BandwidthProber::new(probe_settings()),
        store,
    )
}

fn open_store(dir: &Path) -> Arc<ResultStore> {
    Arc::new(ResultStore::open(dir, 5, Utc::now()).unwrap())
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A relay that was never measured is ranked ahead of every measured one.
#[test]
fn test_never_measured_relay_ranks_first() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let store = ResultStore::open(dir.path(), 5, now).unwrap();

    let old = relay(1);
    let recent = relay(2);
    let fresh = relay(3);
    store
        .append(ProbeResult::new(&old, "s", now - ChronoDuration::days(3), ProbeStatus::Success))
        .unwrap();
    store
        .append(ProbeResult::new(&recent, "s", now - ChronoDuration::hours(1), ProbeStatus::Success))
        .unwrap();

    let prioritizer = RelayPrioritizer::new(PrioritizerConfig {
        fraction_relays: 1.0,
        min_relays: 1,
        measure_authorities: false,
    });
    let ranked = prioritizer.best_priority(&[recent.clone(), old.clone(), fresh.clone()], &store, now);

    let order: Vec<&str> = ranked.iter().map(|e| e.relay.fingerprint.as_str()).collect();
    assert_eq!(order, vec![fresh.fingerprint.as_str(), old.fingerprint.as_str(), recent.fingerprint.as_str()]);
    assert_eq!(ranked[0].staleness, Staleness::Never);
}

/// A failed measurement does not make a relay look freshly measured.
#[test]
fn test_failures_do_not_reset_staleness() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let store = ResultStore::open(dir.path(), 5, now).unwrap();

    let failing = relay(1);
    let measured = relay(2);
    store
        .append(ProbeResult::new(&failing, "s", now - ChronoDuration::minutes(5), ProbeStatus::BuildError))
        .unwrap();
    store
        .append(ProbeResult::new(&measured, "s", now - ChronoDuration::days(1), ProbeStatus::Success))
        .unwrap();

    let prioritizer = RelayPrioritizer::new(PrioritizerConfig::default());
    let ranked = prioritizer.best_priority(&[measured, failing.clone()], &store, now);
    assert_eq!(ranked[0].relay.fingerprint, failing.fingerprint);
}

/// A relay whose path never builds is recorded as a build timeout, and the
/// rest of the batch is still measured.
#[tokio::test(start_paused = true)]
async fn test_build_timeout_is_recorded_and_cycle_continues() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let hung = relay(9);
    let builder = TimeoutPathBuilder::new(
        TestBuilder::new(MIB as f64, &[hung.fingerprint.clone()]),
        Duration::from_secs(3),
    );
    let relays = vec![relay(1), hung.clone(), relay(2), relay(3)];
    let scheduler = scheduler(Arc::clone(&store), relays, Arc::new(builder));

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.selected, 4);
    assert_eq!(report.measured(), 4);
    assert_eq!(report.successes(), 3);
    assert_eq!(report.statuses.get(&ProbeStatus::BuildTimeout), Some(&1));

    let record = store.record(&hung.fingerprint).unwrap();
    assert_eq!(record.len(), 1);
    let result = &record.results()[0];
    assert_eq!(result.status, ProbeStatus::BuildTimeout);
    assert!(result.msg.is_some());
    assert!(result.downloads.is_empty());
}

/// Each relay is measured through a helper exit from the same snapshot;
/// relays without a qualifying helper are recorded as build errors.
#[tokio::test(start_paused = true)]
async fn test_cycle_measures_through_helper_exits() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let https = || "accept 443".parse::<bwscanner::relay::ExitPolicy>().unwrap();
    let target = relay(1).with_bandwidth(1000);
    let helper = relay(2).with_bandwidth(1500).with_exit_policy(https());
    let big_exit = relay(3).with_bandwidth(50_000).with_exit_policy(https());
    let relays = vec![target.clone(), helper.clone(), big_exit.clone()];
    let scheduler = scheduler(
        Arc::clone(&store),
        relays,
        Arc::new(HelperBuilder { rate: MIB as f64 }),
    );

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.successes(), 1);
    assert_eq!(report.statuses.get(&ProbeStatus::BuildError), Some(&2));

    let record = store.record(&target.fingerprint).unwrap();
    let measured = &record.results()[0];
    assert_eq!(measured.status, ProbeStatus::Success);
    assert_eq!(measured.circuit, vec![target.fingerprint.clone(), helper.fingerprint.clone()]);

    for relay in [&helper, &big_exit] {
        let record = store.record(&relay.fingerprint).unwrap();
        let result = &record.results()[0];
        assert_eq!(result.status, ProbeStatus::BuildError);
        assert!(result.msg.as_deref().unwrap().starts_with("no available exits"));
        assert!(result.circuit.is_empty());
    }
}

/// One full cycle followed by generation produces one line per relay with
/// the bandwidth the paths served.
#[tokio::test(start_paused = true)]
async fn test_scan_then_generate_weight_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir.path().join("datadir"));
    let builder = Arc::new(TestBuilder::new(MIB as f64, &[]));
    let scheduler = scheduler(Arc::clone(&store), vec![relay(1), relay(2)], builder);

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.successes(), 2);

    for fingerprint in [fp(1), fp(2)] {
        let record = store.record(&fingerprint).unwrap();
        let result = &record.results()[0];
        assert_eq!(result.downloads.len(), 3);
        assert_eq!(result.rtts.len(), 2);
        assert_eq!(result.dest_url.as_deref(), Some("https://dest.example/bwscanner.bin"));
    }

    let generator = WeightFileGenerator::new(GeneratorConfig::default(), Arc::new(Median));
    let output = dir.path().join("v3bw");
    let weight_file = generator.write(&store, &output, Utc::now()).unwrap();
    assert_eq!(weight_file.lines.len(), 2);
    for line in &weight_file.lines {
        assert_eq!(line.bw, 1024);
        assert!(line.rtt_ms.is_some());
    }
    // Equal bandwidth: fingerprint order breaks the tie.
    assert_eq!(weight_file.lines[0].fingerprint, fp(1));

    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.contains(&format!("node_id=${} bw=1024 nick=relay1", fp(1))));
    assert!(!dir.path().join("v3bw.tmp").exists());

    // Results survive a restart.
    let reopened = ResultStore::open(dir.path().join("datadir"), 5, Utc::now()).unwrap();
    assert_eq!(reopened.result_count(), 2);
}

/// Generation is a pure function of the stored results and the clock.
#[test]
fn test_generation_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let store = ResultStore::open(dir.path(), 5, now).unwrap();
    for (n, rate) in [(1u8, 2.0 * MIB as f64), (2, 0.5 * MIB as f64), (3, MIB as f64)] {
        let samples = vec![bwscanner::store::DownloadSample::new(
            4 * MIB,
            4 * MIB,
            4.0 * MIB as f64 / rate,
        )];
        let result = ProbeResult::new(&relay(n), "s", now - ChronoDuration::hours(n as i64), ProbeStatus::Success)
            .with_samples(vec![Some(0.2)], samples, 0);
        store.append(result).unwrap();
    }

    let generator = WeightFileGenerator::new(GeneratorConfig::default(), Arc::new(Median));
    let first = generator.generate_at(&store, now);
    let second = generator.generate_at(&store, now);
    assert_eq!(first.to_string(), second.to_string());

    let bws: Vec<u64> = first.lines.iter().map(|l| l.bw).collect();
    assert_eq!(bws, vec![2048, 1024, 512]);
    assert_eq!(first.lines[0].rtt_ms, Some(200));
}

/// Samples outside `[min, max]` are discarded and the next request is
/// rescaled towards the target duration.
#[tokio::test(start_paused = true)]
async fn test_prober_rescales_short_and_slow_samples() {
    let path = RatedPath { rate: MIB as f64 };

    for (initial, expected_next) in [(2 * MIB, 6 * MIB), (12 * MIB, 6 * MIB)] {
        let prober = BandwidthProber::new(ProbeSettings {
            num_rtts: 1,
            num_downloads: 1,
            initial_read_request: initial,
            http_timeout: Duration::from_secs(30),
            ..probe_settings()
        });
        let outcome = prober.run(&path).await;

        assert_eq!(outcome.status, ProbeStatus::Success, "initial {}", initial);
        assert_eq!(outcome.discarded, 1);
        assert_eq!(outcome.downloads.len(), 1);
        let kept = &outcome.downloads[0];
        // Paused time rounds timers up to the millisecond.
        let tolerance = MIB / 100;
        assert!(
            kept.requested.abs_diff(expected_next) <= tolerance,
            "requested {} after initial {}",
            kept.requested,
            initial
        );
    }
}
