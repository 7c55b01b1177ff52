//! Helper exit selection.
//!
//! A relay is measured over a two-hop path: the relay under test first,
//! then a helper exit that reaches the destination. The helper should be
//! faster than the target so it is not the bottleneck, but not so much
//! faster that paths concentrate on the few largest exits.

use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use super::PathError;
use crate::relay::Relay;

/// Helper bandwidth floor as a multiple of the target's.
const MIN_RATIO: f64 = 1.25;
/// Helper bandwidth ceiling as a multiple of the target's.
const MAX_RATIO: f64 = 2.0;
/// The ceiling never drops below this, so slow targets still find helpers.
const MIN_CEILING: u64 = 100;

/// Fingerprints of the hops a measurement travels over, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitHops {
    pub target: String,
    pub exit: String,
}

impl CircuitHops {
    pub fn fingerprints(&self) -> [&str; 2] {
        [&self.target, &self.exit]
    }

    /// Hop list as handed to the overlay client, comma separated.
    pub fn to_path_spec(&self) -> String {
        self.fingerprints().join(",")
    }
}

/// Inclusive bandwidth window a helper exit for `target` must fall in.
pub fn helper_bandwidth_window(target: &Relay) -> (u64, u64) {
    let bw = target.consensus_bandwidth as f64;
    let low = (bw * MIN_RATIO).round() as u64;
    let high = ((bw * MAX_RATIO).round() as u64).max(MIN_CEILING);
    (low, high)
}

/// Relays in `relays` that may serve as the helper exit for `target` when
/// fetching from `port`.
pub fn exit_candidates<'r>(target: &Relay, relays: &'r [Relay], port: u16) -> Vec<&'r Relay> {
    let (low, high) = helper_bandwidth_window(target);
    relays
        .iter()
        .filter(|r| r.fingerprint != target.fingerprint)
        .filter(|r| r.can_exit_to(port))
        .filter(|r| (low..=high).contains(&r.consensus_bandwidth))
        .collect()
}

/// Pick a random helper exit for `target`.
pub fn choose_exit(
    target: &Relay,
    relays: &[Relay],
    port: u16,
) -> Result<CircuitHops, PathError> {
    let candidates = exit_candidates(target, relays, port);
    let Some(exit) = candidates.choose(&mut rand::rng()) else {
        warn!(relay = %target, port, "No available exits to help measure");
        return Err(PathError::NoExit {
            fingerprint: target.fingerprint.clone(),
        });
    };
    debug!(
        relay = %target,
        exit = %exit,
        exit_bw = exit.consensus_bandwidth,
        relay_bw = target.consensus_bandwidth,
        candidates = candidates.len(),
        "Selected helper exit"
    );
    Ok(CircuitHops {
        target: target.fingerprint.clone(),
        exit: exit.fingerprint.clone(),
    })
}
