//! On-demand status overview of the whole pipeline.

use crate::steps::PipelineRunResult;
use core_ingest::DedupProgress;
use core_library::BatchRecord;
use core_runtime::config::PipelineConfig;
use core_sync::SyncStatus;
use serde::Serialize;
use std::collections::BTreeMap;

/// Number of batches listed in [`Overview::recent_batches`].
pub const RECENT_BATCH_LIMIT: u32 = 5;

/// Configuration values surfaced next to the live status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewConfig {
    pub source_dir: String,
    pub batch_dir: String,
    pub sorted_dir: String,
    pub api_url: String,
    pub folder_id: Option<String>,
    pub device_id: Option<String>,
    /// Last error reported by the sync daemon
    pub last_error: Option<String>,
}

impl OverviewConfig {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            source_dir: config.paths.source_dir.display().to_string(),
            batch_dir: config.paths.batch_dir.display().to_string(),
            sorted_dir: config.paths.sorted_dir.display().to_string(),
            api_url: config.syncthing.api_url.clone(),
            folder_id: config.syncthing.folder_id().map(str::to_string),
            device_id: config.syncthing.device_id().map(str::to_string),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub running: bool,
    pub dedup: DedupProgress,
    /// Newest first
    pub recent_batches: Vec<BatchRecord>,
    pub file_counts: BTreeMap<String, i64>,
    /// Batches that were `syncing`, after a fresh progress check
    pub syncing_batches: Vec<SyncStatus>,
    pub config: OverviewConfig,
    pub last_run: Option<PipelineRunResult>,
}
