//! # Sync Coordinator
//!
//! Drives batches through the external sync daemon.
//!
//! ## Overview
//!
//! Per batch the coordinator owns the `pending → syncing → synced` part of
//! the lifecycle:
//! - [`SyncCoordinator::start`] flips the batch to `syncing` and asks the
//!   daemon to rescan the batch directory
//! - [`SyncCoordinator::status`] reads completion from the daemon and marks
//!   the batch (and its files) `synced` once it reaches 100%
//! - [`SyncCoordinator::refresh_syncing_batches`] re-polls every `syncing`
//!   batch, which is how progress is recovered after a restart
//!
//! Daemon failures while polling never change stored state. They are
//! reported through [`SyncStatus::detail`] and kept as the coordinator's
//! last error for [`SyncCoordinator::diagnostics`].
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = SyncCoordinator::from_config(store, daemon, &config);
//! coordinator.start("batch_001").await?;
//! let outcome = coordinator
//!     .wait_for_sync("batch_001", PollPolicy::from_config(&config))
//!     .await?;
//! ```

use crate::status::{
    DaemonSnapshot, PollPolicy, SyncDiagnostics, SyncStartResult, SyncStatus, SyncWaitOutcome,
};
use crate::{Result, SyncError};
use chrono::Utc;
use core_library::{BatchRecord, BatchStatus, PipelineStore};
use core_runtime::config::PipelineConfig;
use futures::future::join_all;
use provider_syncthing::{RescanTarget, SyncDaemon};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Where batches live and how the daemon addresses them.
#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    pub batch_dir: PathBuf,
    /// Daemon folder that contains the batch directory; when unset the
    /// batch path itself is rescanned and used as the folder id
    pub folder_id: Option<String>,
    /// Peer whose completion is reported; the local view when unset
    pub device_id: Option<String>,
    /// Pause between marking a batch `syncing` and triggering the rescan
    pub rescan_delay: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_dir: config.paths.batch_dir.clone(),
            folder_id: config.syncthing.folder_id().map(str::to_string),
            device_id: config.syncthing.device_id().map(str::to_string),
            rescan_delay: config.syncthing.rescan_delay(),
        }
    }
}

pub struct SyncCoordinator {
    store: PipelineStore,
    daemon: Arc<dyn SyncDaemon>,
    settings: SyncSettings,
    last_error: RwLock<Option<String>>,
}

impl SyncCoordinator {
    pub fn new(store: PipelineStore, daemon: Arc<dyn SyncDaemon>, settings: SyncSettings) -> Self {
        Self {
            store,
            daemon,
            settings,
            last_error: RwLock::new(None),
        }
    }

    pub fn from_config(
        store: PipelineStore,
        daemon: Arc<dyn SyncDaemon>,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(store, daemon, SyncSettings::from_config(config))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Hand a batch to the daemon.
    ///
    /// Batches already `syncing`, or past it, are left alone and reported
    /// with `started = false`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::BatchNotFound`] for an unknown name
    /// - [`SyncError::BatchDirectoryMissing`] when the directory is gone
    /// - [`SyncError::Daemon`] when the rescan request fails; the batch is
    ///   then marked `error`
    #[instrument(skip(self))]
    pub async fn start(&self, batch_name: &str) -> Result<SyncStartResult> {
        let record = self.find_batch(batch_name).await?;
        if !matches!(record.status, BatchStatus::Pending | BatchStatus::Error) {
            debug!(status = %record.status, "Batch not eligible for sync start");
            return Ok(SyncStartResult {
                batch: record.name,
                started: false,
                status: record.status,
            });
        }

        let batch_path = self.settings.batch_dir.join(&record.name);
        if !batch_path.is_dir() {
            return Err(SyncError::BatchDirectoryMissing(batch_path));
        }

        let batches = self.store.batches();
        if !batches
            .transition(record.id, record.status, BatchStatus::Syncing, Utc::now())
            .await?
        {
            let current = self.find_batch(batch_name).await?;
            debug!(status = %current.status, "Batch changed concurrently, not starting");
            return Ok(SyncStartResult {
                batch: current.name,
                started: false,
                status: current.status,
            });
        }

        if !self.settings.rescan_delay.is_zero() {
            tokio::time::sleep(self.settings.rescan_delay).await;
        }

        let target = match &self.settings.folder_id {
            Some(folder) => RescanTarget::folder(folder.clone(), vec![record.name.clone()]),
            None => RescanTarget::path(batch_path.to_string_lossy()),
        };
        if let Err(e) = self.daemon.trigger_rescan(&target).await {
            let message = e.to_string();
            warn!(error = %message, "Rescan request failed, marking batch as error");
            *self.last_error.write().await = Some(message.clone());
            batches
                .transition(record.id, BatchStatus::Syncing, BatchStatus::Error, Utc::now())
                .await?;
            return Err(SyncError::Daemon(message));
        }

        info!(batch = %record.name, "Sync started");
        Ok(SyncStartResult {
            batch: record.name,
            started: true,
            status: BatchStatus::Syncing,
        })
    }

    /// Current replication progress of a batch.
    ///
    /// Only batches in `syncing` are checked against the daemon; any other
    /// status is a pure read.
    pub async fn status(&self, batch_name: &str) -> Result<SyncStatus> {
        let record = self.find_batch(batch_name).await?;
        self.status_of(record).await
    }

    /// Re-poll every batch currently `syncing`.
    ///
    /// Batches that fail to refresh are logged and left out.
    pub async fn refresh_syncing_batches(&self) -> Result<Vec<SyncStatus>> {
        let syncing = self
            .store
            .batches()
            .find_by_status(&[BatchStatus::Syncing])
            .await?;

        let results = join_all(syncing.into_iter().map(|record| self.status_of(record))).await;
        let mut statuses = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(status) => statuses.push(status),
                Err(e) => warn!(error = %e, "Failed to refresh batch"),
            }
        }
        Ok(statuses)
    }

    /// Watch a started batch until it is synced or the sample budget runs
    /// out.
    ///
    /// The settle phase samples the daemon without polling completion. The
    /// poll phase stops early once the batch is synced and the daemon is no
    /// longer scanning or syncing the folder.
    #[instrument(skip(self, policy))]
    pub async fn wait_for_sync(&self, batch_name: &str, policy: PollPolicy) -> Result<SyncWaitOutcome> {
        let max_samples = policy.max_samples.max(1);
        let mut trace = Vec::new();

        let mut settle_remaining = policy.settle;
        while !settle_remaining.is_zero() && trace.len() < max_samples {
            trace.push(self.snapshot("settle").await);
            let wait = if policy.interval.is_zero() {
                settle_remaining
            } else {
                policy.interval.min(settle_remaining)
            };
            tokio::time::sleep(wait).await;
            settle_remaining -= wait;
        }

        let mut attempts = max_samples.saturating_sub(trace.len()).max(1);
        let mut status = self.status(batch_name).await?;
        loop {
            let mut snapshot = DaemonSnapshot::new("poll");
            snapshot.state = self.folder_state().await;
            snapshot.status = Some(status.status);
            snapshot.progress = Some(status.progress);
            snapshot.detail = status.detail.clone();

            let finished = match status.status {
                BatchStatus::Syncing => false,
                BatchStatus::Synced => !snapshot.daemon_busy(),
                _ => true,
            };
            trace.push(snapshot);

            attempts -= 1;
            if finished || attempts == 0 {
                break;
            }
            tokio::time::sleep(policy.interval).await;
            status = self.status(batch_name).await?;
        }

        if trace.len() > max_samples {
            trace.drain(..trace.len() - max_samples);
        }
        debug!(status = %status.status, progress = status.progress, samples = trace.len(), "Sync wait finished");
        Ok(SyncWaitOutcome { status, trace })
    }

    /// Daemon state sample outside of a completion poll.
    pub async fn snapshot(&self, phase: &str) -> DaemonSnapshot {
        let mut snapshot = DaemonSnapshot::new(phase);
        if let Some(folder) = &self.settings.folder_id {
            match self.daemon.folder_status(folder).await {
                Ok(status) => snapshot.state = state_field(&status),
                Err(e) => snapshot.detail = Some(e.to_string()),
            }
        }
        snapshot
    }

    /// Raw daemon status plus the last error seen by this coordinator.
    pub async fn diagnostics(&self) -> SyncDiagnostics {
        let mut diagnostics = SyncDiagnostics {
            folder_id: self.settings.folder_id.clone(),
            device_id: self.settings.device_id.clone(),
            last_error: self.last_error().await,
            ..SyncDiagnostics::default()
        };

        match self.daemon.system_status().await {
            Ok(status) => diagnostics.system_status = Some(status),
            Err(e) => diagnostics.errors.push(format!("system status: {}", e)),
        }
        if let Some(folder) = &self.settings.folder_id {
            match self.daemon.folder_status(folder).await {
                Ok(status) => diagnostics.folder_status = Some(status),
                Err(e) => diagnostics.errors.push(format!("folder status: {}", e)),
            }
        }

        diagnostics
    }

    async fn find_batch(&self, batch_name: &str) -> Result<BatchRecord> {
        self.store
            .batches()
            .find_by_name(batch_name)
            .await?
            .ok_or_else(|| SyncError::BatchNotFound(batch_name.to_string()))
    }

    async fn status_of(&self, record: BatchRecord) -> Result<SyncStatus> {
        let mut status = SyncStatus {
            batch: record.name.clone(),
            status: record.status,
            progress: 0.0,
            synced_at: record.synced_at,
            detail: None,
        };

        if status.is_synced() {
            status.progress = 100.0;
            return Ok(status);
        }
        if record.status != BatchStatus::Syncing {
            return Ok(status);
        }

        let batch_path = self.settings.batch_dir.join(&record.name);
        if !batch_path.is_dir() {
            status.detail = Some(format!("Batch directory '{}' missing", batch_path.display()));
            return Ok(status);
        }

        let folder = self.settings.folder_id.as_deref().unwrap_or(&record.name);
        let completion = match self
            .daemon
            .folder_completion(folder, self.settings.device_id.as_deref())
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                let message = e.to_string();
                warn!(batch = %record.name, error = %message, "Completion query failed");
                *self.last_error.write().await = Some(message.clone());
                status.detail = Some(message);
                return Ok(status);
            }
        };
        *self.last_error.write().await = None;

        status.progress = completion.completion.clamp(0.0, 100.0);
        if completion.completion >= 100.0 {
            let now = Utc::now();
            if self
                .store
                .batches()
                .mark_synced(record.id, BatchStatus::Syncing, now)
                .await?
            {
                info!(batch = %record.name, "Batch synced");
                status.status = BatchStatus::Synced;
                status.synced_at = Some(now);
            } else {
                let current = self.find_batch(&record.name).await?;
                status.status = current.status;
                status.synced_at = current.synced_at;
            }
        }

        Ok(status)
    }

    async fn folder_state(&self) -> Option<String> {
        let folder = self.settings.folder_id.as_deref()?;
        match self.daemon.folder_status(folder).await {
            Ok(status) => state_field(&status),
            Err(e) => {
                debug!(error = %e, "Folder status unavailable");
                None
            }
        }
    }
}

fn state_field(status: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    status
        .get("state")
        .and_then(|value| value.as_str())
        .map(str::to_string)
}
