#![allow(dead_code)]

use async_trait::async_trait;
use core_library::PipelineStore;
use core_runtime::config::{DebugSettings, PipelineConfig};
use core_runtime::events::EventBus;
use core_service::{PipelineOrchestrator, WorkflowManager};
use filetime::{set_file_mtime, FileTime};
use provider_syncthing::{FolderCompletion, RescanTarget, SyncDaemon, SyncthingError};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// 2021-06-15T12:00:00Z
pub const FIXED_MTIME: i64 = 1_623_758_400;

/// Daemon double reporting a fixed completion for every folder.
pub struct FakeDaemon {
    completion: Mutex<f64>,
    rescan_error: Mutex<Option<SyncthingError>>,
    rescans: Mutex<Vec<RescanTarget>>,
}

impl FakeDaemon {
    pub fn completing(completion: f64) -> Arc<Self> {
        Arc::new(Self {
            completion: Mutex::new(completion),
            rescan_error: Mutex::new(None),
            rescans: Mutex::new(Vec::new()),
        })
    }

    pub fn set_completion(&self, completion: f64) {
        *self.completion.lock().unwrap() = completion;
    }

    pub fn fail_rescans(&self, error: SyncthingError) {
        *self.rescan_error.lock().unwrap() = Some(error);
    }

    pub fn clear_rescan_error(&self) {
        *self.rescan_error.lock().unwrap() = None;
    }

    pub fn rescan_count(&self) -> usize {
        self.rescans.lock().unwrap().len()
    }
}

#[async_trait]
impl SyncDaemon for FakeDaemon {
    async fn trigger_rescan(&self, target: &RescanTarget) -> provider_syncthing::Result<()> {
        self.rescans.lock().unwrap().push(target.clone());
        match self.rescan_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn folder_completion(
        &self,
        folder: &str,
        _device: Option<&str>,
    ) -> provider_syncthing::Result<FolderCompletion> {
        Ok(FolderCompletion {
            folder: folder.to_string(),
            completion: *self.completion.lock().unwrap(),
        })
    }

    async fn system_status(&self) -> provider_syncthing::Result<Map<String, Value>> {
        Ok(Map::new())
    }

    async fn folder_status(&self, _folder: &str) -> provider_syncthing::Result<Map<String, Value>> {
        let mut map = Map::new();
        map.insert("state".to_string(), Value::String("idle".to_string()));
        Ok(map)
    }
}

pub struct Fixture {
    root: TempDir,
    pub store: PipelineStore,
    pub daemon: Arc<FakeDaemon>,
    pub events: EventBus,
}

impl Fixture {
    pub async fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        for dir in ["source", "batches", "sorted"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        Self {
            root,
            store: PipelineStore::in_memory().await.unwrap(),
            daemon: FakeDaemon::completing(100.0),
            events: EventBus::default(),
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.path().join("source")
    }

    pub fn batch_dir(&self) -> PathBuf {
        self.root.path().join("batches")
    }

    pub fn sorted_dir(&self) -> PathBuf {
        self.root.path().join("sorted")
    }

    /// Configuration without delays that polls the daemon once.
    pub fn config(&self, debug: DebugSettings) -> PipelineConfig {
        PipelineConfig::builder()
            .source_dir(self.source_dir())
            .batch_dir(self.batch_dir())
            .sorted_dir(self.sorted_dir())
            .syncthing_folder("media")
            .rescan_delay_sec(0.0)
            .settle_delay_sec(0.0)
            .post_sync_delay_sec(0.0)
            .trace_samples(1)
            .exif_fallback(true)
            .debug(debug)
            .build()
            .unwrap()
    }

    pub fn orchestrator(&self, config: &PipelineConfig) -> Arc<PipelineOrchestrator> {
        Arc::new(
            PipelineOrchestrator::from_config(
                self.store.clone(),
                self.daemon.clone(),
                config,
                self.events.clone(),
            )
            .unwrap(),
        )
    }

    pub fn workflow(&self, debug: DebugSettings) -> WorkflowManager {
        let config = self.config(debug.clone());
        WorkflowManager::new(self.orchestrator(&config), debug)
    }

    /// Source file with a pinned modification time.
    pub fn source_file(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.source_dir().join(rel);
        write_file(&path, contents);
        path
    }
}

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    set_file_mtime(path, FileTime::from_unix_time(FIXED_MTIME, 0)).unwrap();
}
