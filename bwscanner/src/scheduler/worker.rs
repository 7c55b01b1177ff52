//! One relay's measurement: build, probe, record.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::SchedulerError;
use crate::path::PathBuilder;
use crate::prober::BandwidthProber;
use crate::relay::Relay;
use crate::store::{ProbeResult, ProbeStatus, ResultStore};

/// Shared, read-only collaborators of every worker.
pub(crate) struct WorkerContext {
    pub builder: Arc<dyn PathBuilder>,
    pub prober: Arc<BandwidthProber>,
    pub store: Arc<ResultStore>,
    pub scanner: String,
}

/// Measure `relay` and append the result. `relays` is the cycle's snapshot
/// the path builder picks helper hops from.
///
/// Build and probe failures are recorded as results; only a failure to
/// record is returned as an error.
pub(crate) async fn measure_relay(
    ctx: &WorkerContext,
    relay: &Relay,
    relays: &[Relay],
) -> Result<ProbeStatus, SchedulerError> {
    debug!(relay = %relay, "Measuring relay");

    let result = match ctx.builder.build(relay, relays).await {
        Err(e) => {
            warn!(relay = %relay, error = %e, "Path build failed");
            ProbeResult::new(relay, &ctx.scanner, Utc::now(), e.status()).with_msg(e.to_string())
        }
        Ok(path) => {
            let outcome = ctx.prober.run(path.as_ref()).await;
            let mut result = ProbeResult::new(relay, &ctx.scanner, Utc::now(), outcome.status)
                .with_destination(path.destination_url())
                .with_samples(outcome.rtts, outcome.downloads, outcome.discarded);
            if let Some(hops) = path.hops() {
                result = result.with_circuit(hops);
            }
            drop(path);

            if let Some(error) = outcome.error {
                warn!(relay = %relay, status = %outcome.status, error = %error, "Probe failed");
                result = result.with_msg(error);
            } else {
                info!(
                    relay = %relay,
                    samples = result.downloads.len(),
                    discarded = result.discarded,
                    "Relay measured"
                );
            }
            result
        }
    };

    let status = result.status;
    // File appends block; keep them off the runtime's worker threads.
    let store = Arc::clone(&ctx.store);
    tokio::task::spawn_blocking(move || store.append(result))
        .await
        .map_err(|e| SchedulerError::Worker(format!("result append task: {}", e)))??;
    Ok(status)
}
