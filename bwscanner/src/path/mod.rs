//! Isolated measurement paths.
//!
//! The overlay network is consumed as a capability: "give me a path
//! through relay X, or fail". [`PathBuilder`] is that capability and
//! [`MeasurementPath`] is what a successful build hands back: something
//! that can fetch byte ranges of one destination resource over the path.
//!
//! Builders get the cycle's relay snapshot along with the target so they
//! can pick a helper exit for the second hop (see [`choose_exit`]).
//!
//! # Dyn Compatibility
//!
//! Both traits return [`BoxFuture`] so they can be used as trait objects
//! (`Arc<dyn PathBuilder>`, `Box<dyn MeasurementPath>`), which lets the
//! scheduler run against the real proxy adapter or a test double.
//!
//! # Timeouts
//!
//! [`TimeoutPathBuilder`] bounds the whole build, including the transport
//! connection to the first hop and the destination check. When it fires the
//! in-flight build future is dropped, which abandons the path.

mod error;
mod exits;
mod proxy;

pub use error::{PathError, TransportError};
pub use exits::{choose_exit, exit_candidates, helper_bandwidth_window, CircuitHops};
pub use proxy::{HttpPath, ProxyPathBuilder, ProxyPathConfig};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use crate::relay::Relay;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A built path to one destination resource.
///
/// Dropping the value releases the path.
pub trait MeasurementPath: Send + Sync {
    /// URL of the resource probes are fetched from.
    fn destination_url(&self) -> &str;

    /// Size of the destination resource in bytes.
    fn content_length(&self) -> u64;

    /// Fetch `len` bytes starting at `start` and return how many arrived.
    fn fetch_range(&self, start: u64, len: u64) -> BoxFuture<'_, Result<u64, TransportError>>;

    /// Hops the path travels over, if the builder chose them.
    fn hops(&self) -> Option<&CircuitHops> {
        None
    }
}

/// Builds isolated paths through a given relay.
pub trait PathBuilder: Send + Sync {
    /// Build a path measuring `relay`. `relays` is the current snapshot
    /// that helper hops are chosen from.
    fn build<'a>(
        &'a self,
        relay: &'a Relay,
        relays: &'a [Relay],
    ) -> BoxFuture<'a, Result<Box<dyn MeasurementPath>, PathError>>;
}

/// Bounds another builder with the circuit timeout.
pub struct TimeoutPathBuilder<B> {
    inner: B,
    timeout: Duration,
}

impl<B: PathBuilder> TimeoutPathBuilder<B> {
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<B: PathBuilder> PathBuilder for TimeoutPathBuilder<B> {
    fn build<'a>(
        &'a self,
        relay: &'a Relay,
        relays: &'a [Relay],
    ) -> BoxFuture<'a, Result<Box<dyn MeasurementPath>, PathError>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.inner.build(relay, relays)).await {
                Ok(Ok(path)) => {
                    debug!(relay = %relay, url = path.destination_url(), "Path built");
                    Ok(path)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!(
                        relay = %relay,
                        timeout_secs = self.timeout.as_secs(),
                        "Path build timed out, abandoning"
                    );
                    Err(PathError::Timeout {
                        fingerprint: relay.fingerprint.clone(),
                        timeout: self.timeout,
                    })
                }
            }
        })
    }
}
