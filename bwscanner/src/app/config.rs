//! Per-component settings derived from the configuration file.
//!
//! The file is read once; every component then receives its own immutable
//! settings at construction and never looks at global state.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigFile;
use crate::logging::LoggingConfig;
use crate::path::ProxyPathConfig;
use crate::prioritizer::PrioritizerConfig;
use crate::prober::{DownloadThresholds, ProbeSettings};
use crate::retention::RetentionConfig;
use crate::scheduler::SchedulerConfig;
use crate::weights::GeneratorConfig;

/// Everything needed to assemble a scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub datadir: PathBuf,
    /// Validity window of results, in days.
    pub data_period_days: u32,
    pub relays_file: PathBuf,
    pub v3bw_path: PathBuf,
    pub started_path: PathBuf,
    pub circuit_timeout: Duration,
    pub path: ProxyPathConfig,
    pub probe: ProbeSettings,
    pub prioritizer: PrioritizerConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub retention_interval: Duration,
    pub generator: GeneratorConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Derive component settings from a validated configuration.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        let general = &config.general;
        let scanner = &config.scanner;
        let probe_defaults = ProbeSettings::default();
        let http_timeout = seconds(general.http_timeout, probe_defaults.http_timeout);

        Self {
            datadir: config.paths.datadir.clone(),
            data_period_days: general.data_period,
            relays_file: config.paths.relays_file.clone(),
            v3bw_path: config.paths.v3bw_fname.clone(),
            started_path: config.paths.started_filepath.clone(),
            circuit_timeout: Duration::from_secs(general.circuit_timeout),
            path: ProxyPathConfig {
                destinations: config.destinations.urls.clone(),
                socks_proxy: config.destinations.socks_proxy.clone(),
                min_content_length: scanner.max_download_size,
                http_timeout,
            },
            probe: ProbeSettings {
                num_rtts: scanner.num_rtts,
                num_downloads: scanner.num_downloads,
                initial_read_request: scanner.initial_read_request,
                min_download_size: scanner.min_download_size,
                max_download_size: scanner.max_download_size,
                thresholds: DownloadThresholds {
                    toofast: scanner.download_toofast,
                    min: scanner.download_min,
                    target: scanner.download_target,
                    max: scanner.download_max,
                },
                http_timeout,
                transfer_timeout: seconds(
                    scanner.transfer_timeout,
                    probe_defaults.transfer_timeout,
                ),
            },
            prioritizer: PrioritizerConfig {
                fraction_relays: config.prioritizer.fraction_relays,
                min_relays: config.prioritizer.min_relays,
                measure_authorities: config.prioritizer.measure_authorities,
            },
            scheduler: SchedulerConfig {
                measurement_threads: scanner.measurement_threads,
                idle_interval: Duration::from_secs(scanner.idle_interval),
                failure_pause: Duration::from_secs(scanner.failure_pause),
                scanner: scanner.nickname.clone(),
            },
            retention: RetentionConfig {
                stale_days: config.cleanup.stale_days,
                rotten_days: config.cleanup.rotten_days,
            },
            retention_interval: Duration::from_secs(config.cleanup.interval),
            generator: GeneratorConfig::default(),
            logging: LoggingConfig {
                level: config.logging.level.clone(),
                directory: config
                    .logging
                    .to_file
                    .then(|| config.logging.directory.clone()),
            },
        }
    }
}

/// Fractional seconds as a `Duration`; values validation would reject
/// (negative, NaN, infinite or too large) fall back to `fallback`.
fn seconds(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_flow_into_components() {
        let file = ConfigFile::with_home("/srv/scan");
        let config = AppConfig::from_config_file(&file);

        assert_eq!(config.datadir, PathBuf::from("/srv/scan/datadir"));
        assert_eq!(config.data_period_days, 5);
        assert_eq!(config.circuit_timeout, Duration::from_secs(60));
        assert_eq!(config.probe, ProbeSettings::default());
        assert_eq!(config.prioritizer, PrioritizerConfig::default());
        assert_eq!(config.retention, RetentionConfig::default());
        assert_eq!(config.path.min_content_length, 1 << 30);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.logging.directory, None);
    }

    #[test]
    fn test_overrides_are_carried() {
        let mut file = ConfigFile::with_home("/srv/scan");
        file.general.http_timeout = 2.5;
        file.scanner.measurement_threads = 8;
        file.scanner.failure_pause = 300;
        file.logging.to_file = true;
        let config = AppConfig::from_config_file(&file);

        assert_eq!(config.probe.http_timeout, Duration::from_millis(2500));
        assert_eq!(config.path.http_timeout, Duration::from_millis(2500));
        assert_eq!(config.scheduler.measurement_threads, 8);
        assert_eq!(config.scheduler.failure_pause, Duration::from_secs(300));
        assert_eq!(config.logging.directory, Some(PathBuf::from("/srv/scan/log")));
    }

    #[test]
    fn test_unrepresentable_seconds_fall_back() {
        let mut file = ConfigFile::with_home("/srv/scan");
        file.general.http_timeout = f64::INFINITY;
        file.scanner.transfer_timeout = f64::NAN;
        let config = AppConfig::from_config_file(&file);
        assert_eq!(config.probe.http_timeout, Duration::from_secs(10));
        assert_eq!(config.path.http_timeout, Duration::from_secs(10));
        assert_eq!(config.probe.transfer_timeout, Duration::from_secs(300));
    }
}
