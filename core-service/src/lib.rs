//! # Pipeline Service
//!
//! Wires the stage crates into one service and exposes the run controls.
//!
//! ## Components
//!
//! - **Orchestrator** (`orchestrator`): fixed stage order, step results
//! - **Workflow Manager** (`workflow`): background runs, exclusivity,
//!   status and overview
//! - **Debug Controller** (`debug`): pause-after-step with manual advance
//!   or timeout
//! - **Cleanup** (`cleanup`): removal of empty batch directories
//! - **Dashboard** (`dashboard`): aggregate file, batch and storage counters
//! - **Audit** (`audit`): event recorder and configuration change log
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::PipelineConfig;
//! use core_service::PipelineService;
//!
//! let config = PipelineConfig::builder()
//!     .source_dir("/srv/media/incoming")
//!     .batch_dir("/srv/media/batches")
//!     .sorted_dir("/srv/media/sorted")
//!     .build()?;
//! let service = PipelineService::bootstrap(config).await?;
//! service.workflow().trigger().await;
//! service.workflow().wait_for_completion().await;
//! ```

pub mod audit;
pub mod cleanup;
pub mod dashboard;
pub mod debug;
pub mod error;
pub mod orchestrator;
pub mod overview;
pub mod steps;
pub mod workflow;

pub use audit::{record_config_update, EventRecorder};
pub use cleanup::{CleanupReport, CleanupService};
pub use dashboard::{BatchSummary, DashboardService, DashboardSummary, FileSummary, StorageSummary};
pub use debug::{DebugController, DebugState};
pub use error::{CoreError, Result};
pub use orchestrator::{PipelineOrchestrator, StepObserver};
pub use overview::{Overview, OverviewConfig};
pub use steps::{
    PipelineRunResult, PipelineStepResult, StepData, StepName, StepStatus, SyncStepData,
};
pub use workflow::{WorkflowManager, WorkflowStatus};

use core_library::{DatabaseConfig, PipelineStore};
use core_runtime::config::{ConfigChange, PipelineConfig};
use core_runtime::events::EventBus;
use provider_syncthing::{SyncDaemon, SyncthingClient};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Primary façade exposed to host processes.
pub struct PipelineService {
    config: PipelineConfig,
    store: PipelineStore,
    daemon: Arc<dyn SyncDaemon>,
    events: EventBus,
    workflow: WorkflowManager,
    dashboard: DashboardService,
    recorder: JoinHandle<()>,
}

impl PipelineService {
    /// Open the database named in `config` and connect to the daemon over
    /// HTTP.
    pub async fn bootstrap(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let store = PipelineStore::open(DatabaseConfig::new(config.system.db_path.clone())).await?;
        let daemon = Arc::new(SyncthingClient::from_config(&config.syncthing)?);
        Self::new(config, store, daemon)
    }

    /// Assemble the service around an existing store and daemon.
    pub fn new(config: PipelineConfig, store: PipelineStore, daemon: Arc<dyn SyncDaemon>) -> Result<Self> {
        let events = EventBus::default();
        let recorder = EventRecorder::new(store.clone()).spawn(&events);
        let (workflow, dashboard) = build_components(&config, &store, &daemon, &events)?;
        info!(
            source_dir = %config.paths.source_dir.display(),
            batch_dir = %config.paths.batch_dir.display(),
            "Pipeline service ready"
        );

        Ok(Self {
            config,
            store,
            daemon,
            events,
            workflow,
            dashboard,
            recorder,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn workflow(&self) -> &WorkflowManager {
        &self.workflow
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        self.workflow.orchestrator()
    }

    pub async fn dashboard(&self) -> Result<DashboardSummary> {
        self.dashboard.summary().await
    }

    /// Swap in a new configuration between runs, logging what changed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RunActive`] while a run is in progress, or the
    /// validation error of `config`.
    pub async fn reconfigure(&mut self, config: PipelineConfig, actor: &str) -> Result<Vec<ConfigChange>> {
        if self.workflow.is_running() {
            return Err(CoreError::RunActive);
        }
        config.validate()?;
        let (workflow, dashboard) = build_components(&config, &self.store, &self.daemon, &self.events)?;
        let changes = record_config_update(&self.store, &self.config, &config, actor).await?;

        self.workflow = workflow;
        self.dashboard = dashboard;
        self.config = config;
        info!(changes = changes.len(), %actor, "Configuration applied");
        Ok(changes)
    }

    /// Wait for the active run and close the store.
    pub async fn shutdown(self) {
        self.workflow.wait_for_completion().await;
        self.recorder.abort();
        self.store.close().await;
    }
}

fn build_components(
    config: &PipelineConfig,
    store: &PipelineStore,
    daemon: &Arc<dyn SyncDaemon>,
    events: &EventBus,
) -> Result<(WorkflowManager, DashboardService)> {
    let orchestrator = PipelineOrchestrator::from_config(
        store.clone(),
        Arc::clone(daemon),
        config,
        events.clone(),
    )?;
    let workflow = WorkflowManager::new(Arc::new(orchestrator), config.workflow.debug.clone());
    let dashboard = DashboardService::new(
        store.clone(),
        config.paths.batch_dir.clone(),
        config.paths.sorted_dir.clone(),
    );
    Ok((workflow, dashboard))
}
