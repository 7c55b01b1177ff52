//! bwscanner - relay bandwidth measurement for anonymity-network overlays.
//!
//! This library measures the achievable download bandwidth of relays by
//! probing each one over an isolated path, keeps the outcomes in a
//! time-windowed result store, and folds the fresh results into the weight
//! file read by directory authorities.
//!
//! # Architecture
//!
//! ```text
//! NodeFeed ──► RelayPrioritizer ──► MeasurementScheduler ──┐
//!                    ▲                 │ (worker pool)      │
//!                    │                 ▼                    │
//!                    │           PathBuilder ──► BandwidthProber
//!                    │                                      │
//!                    └──────────── ResultStore ◄────────────┘
//!                                   │       │
//!                     RetentionManager   WeightFileGenerator
//! ```

pub mod app;
pub mod config;
pub mod logging;
pub mod path;
pub mod prioritizer;
pub mod prober;
pub mod relay;
pub mod retention;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod weights;

/// Library version, as published in weight file headers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
