//! Removal of empty batch directories left behind after sorting.

use crate::Result;
use core_runtime::config::PipelineConfig;
use core_runtime::pattern::NamingPattern;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SYNC_MARKERS: [&str; 2] = [".stfolder", ".stignore"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Full paths of the removed directories
    pub removed_batch_dirs: Vec<String>,
}

pub struct CleanupService {
    batch_dir: PathBuf,
    naming: NamingPattern,
    enabled: bool,
}

impl CleanupService {
    pub fn new(batch_dir: impl Into<PathBuf>, naming: NamingPattern, enabled: bool) -> Self {
        Self {
            batch_dir: batch_dir.into(),
            naming,
            enabled,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            config.paths.batch_dir.clone(),
            config.naming_pattern()?,
            config.system.cleanup_empty_batches,
        ))
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Remove every empty batch directory directly below the batch root.
    pub async fn run(&self) -> Result<CleanupReport> {
        if !self.enabled {
            return Ok(CleanupReport::default());
        }
        let batch_dir = self.batch_dir.clone();
        let naming = self.naming.clone();
        let removed = tokio::task::spawn_blocking(move || purge_empty(&batch_dir, &naming)).await??;
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed empty batch directories");
        }
        Ok(CleanupReport {
            removed_batch_dirs: removed,
        })
    }
}

fn purge_empty(batch_dir: &Path, naming: &NamingPattern) -> std::io::Result<Vec<String>> {
    if !batch_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = fs::read_dir(batch_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    entries.sort();

    let mut removed = Vec::new();
    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || SYNC_MARKERS.contains(&name) || !naming.matches(name) {
            continue;
        }
        if !path.is_dir() || !is_empty_dir(&path) {
            continue;
        }
        match fs::remove_dir(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed empty batch directory");
                removed.push(path.display().to_string());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove batch directory"),
        }
    }
    Ok(removed)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
