//! Path and transport errors.

use std::time::Duration;

use thiserror::Error;

use crate::store::ProbeStatus;

/// Why a path to a relay could not be provided.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PathError {
    /// The build did not finish within the circuit timeout.
    #[error("path to {fingerprint} not built within {}s", timeout.as_secs())]
    Timeout {
        fingerprint: String,
        timeout: Duration,
    },

    /// The overlay refused or failed the build.
    #[error("path to {fingerprint} failed: {reason}")]
    Failed { fingerprint: String, reason: String },

    /// No relay qualifies as the helper exit.
    #[error("no available exits to help measure {fingerprint}")]
    NoExit { fingerprint: String },

    /// The path came up but the chosen destination cannot serve the probe.
    #[error("destination {url} unusable: {reason}")]
    DestinationUnusable { url: String, reason: String },

    /// The builder itself is misconfigured.
    #[error("invalid path configuration: {0}")]
    InvalidConfig(String),
}

impl PathError {
    /// Status recorded for an attempt that ended with this error.
    pub fn status(&self) -> ProbeStatus {
        match self {
            PathError::Timeout { .. } => ProbeStatus::BuildTimeout,
            _ => ProbeStatus::BuildError,
        }
    }
}

/// A failed request over an established path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}
