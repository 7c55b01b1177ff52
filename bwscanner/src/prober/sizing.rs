//! Adaptive download sizing.
//!
//! After every download sample the prober decides whether to keep it and
//! how many bytes to ask for next. The aim is to land each download near
//! `target` seconds: long enough to measure throughput rather than latency,
//! short enough to keep a cycle moving.
//!
//! | duration `d`             | class        | kept | next size               |
//! |--------------------------|--------------|------|-------------------------|
//! | `d < toofast`            | `TooFast`    | no   | `size × 5`              |
//! | `toofast ≤ d < min`      | `Short`      | no   | `size × target / d`     |
//! | `min ≤ d ≤ max`          | `Acceptable` | yes  | `size × target / d`     |
//! | `d > max`                | `TooSlow`    | no   | `size × target / d`     |
//!
//! Next sizes are clamped to `[min_download_size, max_download_size]`.
//! A request that is already at the maximum size cannot grow, so a fast
//! sample at that size is kept as long as it is not slower than `max`.

/// Growth factor after a too-fast sample.
pub const TOOFAST_MULTIPLIER: u64 = 5;

/// Duration thresholds in seconds; `toofast < min <= target <= max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadThresholds {
    pub toofast: f64,
    pub min: f64,
    pub target: f64,
    pub max: f64,
}

impl Default for DownloadThresholds {
    fn default() -> Self {
        Self {
            toofast: 1.0,
            min: 5.0,
            target: 6.0,
            max: 10.0,
        }
    }
}

/// Inclusive bounds on the requested size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    pub min: u64,
    pub max: u64,
}

impl SizeBounds {
    pub fn clamp(&self, size: u64) -> u64 {
        size.clamp(self.min, self.max.max(self.min))
    }
}

/// Where a sample's duration falls relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleClass {
    TooFast,
    Short,
    Acceptable,
    TooSlow,
}

pub fn classify(duration: f64, thresholds: &DownloadThresholds) -> SampleClass {
    if duration < thresholds.toofast {
        SampleClass::TooFast
    } else if duration < thresholds.min {
        SampleClass::Short
    } else if duration <= thresholds.max {
        SampleClass::Acceptable
    } else {
        SampleClass::TooSlow
    }
}

/// What to do after one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeDecision {
    pub class: SampleClass,
    pub keep: bool,
    pub next_size: u64,
}

/// `size × target / duration`, truncated and clamped.
pub fn rescale(size: u64, duration: f64, target: f64, bounds: &SizeBounds) -> u64 {
    if !(duration > 0.0) {
        return bounds.clamp(size.saturating_mul(TOOFAST_MULTIPLIER));
    }
    // Float to integer casts saturate, so huge ratios land on u64::MAX.
    let scaled = (size as f64 * target / duration) as u64;
    bounds.clamp(scaled)
}

pub fn next_request_size(
    size: u64,
    duration: f64,
    thresholds: &DownloadThresholds,
    bounds: &SizeBounds,
) -> u64 {
    match classify(duration, thresholds) {
        SampleClass::TooFast => bounds.clamp(size.saturating_mul(TOOFAST_MULTIPLIER)),
        _ => rescale(size, duration, thresholds.target, bounds),
    }
}

pub fn should_keep(size: u64, duration: f64, thresholds: &DownloadThresholds, bounds: &SizeBounds) -> bool {
    match classify(duration, thresholds) {
        SampleClass::Acceptable => true,
        SampleClass::TooFast | SampleClass::Short => size >= bounds.max,
        SampleClass::TooSlow => false,
    }
}

pub fn evaluate_sample(
    size: u64,
    duration: f64,
    thresholds: &DownloadThresholds,
    bounds: &SizeBounds,
) -> SizeDecision {
    SizeDecision {
        class: classify(duration, thresholds),
        keep: should_keep(size, duration, thresholds, bounds),
        next_size: next_request_size(size, duration, thresholds, bounds),
    }
}
