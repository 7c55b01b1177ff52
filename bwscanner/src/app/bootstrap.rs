//! Scanner assembly and lifecycle.
//!
//! `ScannerApp` wires the components together in one place: the result
//! store and node feed first, then on demand the path builder, scheduler,
//! retention manager and weight file generator, each with its own settings
//! from [`AppConfig`].

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::AppConfig;
use super::error::AppError;
use crate::path::{PathBuilder, ProxyPathBuilder, TimeoutPathBuilder};
use crate::prioritizer::RelayPrioritizer;
use crate::prober::BandwidthProber;
use crate::relay::{FileNodeFeed, NodeFeed};
use crate::retention::{RetentionDaemon, RetentionManager};
use crate::scheduler::MeasurementScheduler;
use crate::store::ResultStore;
use crate::weights::{write_started, BandwidthAggregator, WeightFileGenerator};

/// An assembled scanner.
///
/// # Example
///
/// ```ignore
/// use bwscanner::app::{AppConfig, ScannerApp};
///
/// let app = ScannerApp::open(AppConfig::from_config_file(&config))?;
/// let shutdown = CancellationToken::new();
/// app.run(shutdown).await?;
/// ```
pub struct ScannerApp {
    config: AppConfig,
    store: Arc<ResultStore>,
    feed: Arc<dyn NodeFeed>,
}

impl ScannerApp {
    /// Open the result store and the relay list named in `config`.
    pub fn open(config: AppConfig) -> Result<Self, AppError> {
        let store = ResultStore::open(&config.datadir, config.data_period_days, Utc::now())?;
        let feed = Arc::new(FileNodeFeed::new(&config.relays_file));
        Ok(Self::with_components(config, Arc::new(store), feed))
    }

    /// Assemble from already-built collaborators.
    pub fn with_components(
        config: AppConfig,
        store: Arc<ResultStore>,
        feed: Arc<dyn NodeFeed>,
    ) -> Self {
        Self {
            config,
            store,
            feed,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// The proxy path builder bounded by the circuit timeout.
    pub fn path_builder(&self) -> Result<Arc<dyn PathBuilder>, AppError> {
        let proxy = ProxyPathBuilder::new(self.config.path.clone())?;
        Ok(Arc::new(TimeoutPathBuilder::new(
            proxy,
            self.config.circuit_timeout,
        )))
    }

    pub fn scheduler(&self, builder: Arc<dyn PathBuilder>) -> MeasurementScheduler {
        MeasurementScheduler::new(
            self.config.scheduler.clone(),
            Arc::clone(&self.feed),
            RelayPrioritizer::new(self.config.prioritizer.clone()),
            builder,
            BandwidthProber::new(self.config.probe.clone()),
            Arc::clone(&self.store),
        )
    }

    pub fn retention_manager(&self) -> RetentionManager {
        RetentionManager::new(&self.config.datadir, self.config.retention)
    }

    pub fn generator(&self, aggregator: Arc<dyn BandwidthAggregator>) -> WeightFileGenerator {
        WeightFileGenerator::new(self.config.generator.clone(), aggregator)
    }

    /// Scan until `shutdown` is cancelled, with periodic retention passes.
    ///
    /// Records the start time first so weight files can report it.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<u64, AppError> {
        self.run_with_builder(self.path_builder()?, shutdown).await
    }

    pub async fn run_with_builder(
        &self,
        builder: Arc<dyn PathBuilder>,
        shutdown: CancellationToken,
    ) -> Result<u64, AppError> {
        let started_path = &self.config.started_path;
        write_started(started_path, Utc::now()).map_err(|source| AppError::Started {
            path: started_path.clone(),
            source,
        })?;

        let retention_shutdown = shutdown.child_token();
        let daemon = RetentionDaemon::new(self.retention_manager(), self.config.retention_interval);
        let retention = tokio::spawn(daemon.run(retention_shutdown.clone()));

        info!(
            datadir = %self.config.datadir.display(),
            relays_file = %self.config.relays_file.display(),
            "Scanner starting"
        );
        let result = self.scheduler(builder).run(shutdown).await;

        retention_shutdown.cancel();
        let _ = retention.await;
        info!("Scanner stopped");
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::weights::{read_started, Median};

    fn app(home: &std::path::Path) -> ScannerApp {
        let config = AppConfig::from_config_file(&ConfigFile::with_home(home));
        ScannerApp::open(config).unwrap()
    }

    #[test]
    fn test_open_creates_datadir() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        assert!(dir.path().join("datadir").is_dir());
        assert_eq!(app.store().result_count(), 0);
        assert!(app.path_builder().is_ok());
    }

    #[tokio::test]
    async fn test_run_records_start_and_honours_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let builder = app.path_builder().unwrap();
        let cycles = app.run_with_builder(builder, shutdown).await.unwrap();
        assert_eq!(cycles, 0);
        assert!(read_started(&app.config().started_path).is_some());
    }

    #[test]
    fn test_generator_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let wf = app
            .generator(Arc::new(Median))
            .generate_at(app.store(), Utc::now());
        assert!(wf.lines.is_empty());
    }
}
