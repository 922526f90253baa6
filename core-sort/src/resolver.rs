//! # Sort Resolver
//!
//! Files synced batches into the dated archive.
//!
//! ## Overview
//!
//! For every file of a synced batch the resolver picks a capture time
//! (stored value, then EXIF, then optionally the modification time),
//! renders the folder pattern for it and relocates the file below the
//! sorted root. Existing files are never overwritten: a colliding name gets
//! `_1`, `_2`, ... appended to its stem.
//!
//! Sorting is best effort per file. Files that cannot be dated or have
//! vanished are skipped and counted; the batch is stamped `sorted` once
//! every file has been visited. Re-running a batch left in `sorting` (for
//! example after a crash) picks up where it stopped, since files already in
//! place are recognised and only re-marked.

use crate::{Result, SortError};
use chrono::{DateTime, Utc};
use core_library::transfer::{destination_candidates, relocate, undo_relocation};
use core_library::{
    BatchRecord, BatchStatus, FileRecord, FileStatus, LibraryError, PipelineStore,
};
use core_metadata::resolve_capture_time;
use core_runtime::config::{PipelineConfig, TransferMode};
use core_runtime::pattern::DatePattern;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const READY_STATUSES: [FileStatus; 3] = [FileStatus::Batched, FileStatus::Synced, FileStatus::Sorted];

/// Outcome of [`SortResolver::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortResult {
    pub batch: String,
    pub started: bool,
    pub sorted_files: u64,
    pub skipped_files: u64,
    /// Why the batch was not sorted
    pub reason: Option<String>,
}

impl SortResult {
    fn not_started(batch: &str, reason: impl Into<String>) -> Self {
        Self {
            batch: batch.to_string(),
            started: false,
            sorted_files: 0,
            skipped_files: 0,
            reason: Some(reason.into()),
        }
    }
}

/// Sort progress of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortStatus {
    pub batch: String,
    pub status: BatchStatus,
    pub total_files: u64,
    pub sorted_files: u64,
}

#[derive(Debug, Clone)]
pub struct SortSettings {
    pub sorted_dir: PathBuf,
    pub folder_pattern: DatePattern,
    /// Fall back to the modification time when a file carries no EXIF date
    pub exif_fallback: bool,
    pub transfer_mode: TransferMode,
}

impl SortSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            sorted_dir: config.paths.sorted_dir.clone(),
            folder_pattern: config.folder_pattern()?,
            exif_fallback: config.sorter.exif_fallback,
            transfer_mode: config.sorter.transfer_mode,
        })
    }
}

enum Dating {
    Dated { dest_dir: PathBuf, captured: DateTime<Utc> },
    InPlace { captured: DateTime<Utc> },
    Skipped,
}

pub struct SortResolver {
    store: PipelineStore,
    settings: SortSettings,
}

impl SortResolver {
    pub fn new(store: PipelineStore, settings: SortSettings) -> Self {
        Self { store, settings }
    }

    pub fn from_config(store: PipelineStore, config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(store, SortSettings::from_config(config)?))
    }

    /// Sort every ready file of `batch_name` into the archive.
    ///
    /// Only batches that reached `synced` (or a `sorting` run that was
    /// interrupted) are sorted; anything else is reported with
    /// `started = false` and a reason.
    #[instrument(skip(self))]
    pub async fn start(&self, batch_name: &str) -> Result<SortResult> {
        let record = self.find_batch(batch_name).await?;
        match record.status {
            BatchStatus::Sorted => return Ok(SortResult::not_started(batch_name, "Batch already sorted")),
            BatchStatus::Synced | BatchStatus::Sorting => {}
            other => {
                debug!(status = %other, "Batch not synced, sort deferred");
                return Ok(SortResult::not_started(
                    batch_name,
                    format!("Batch '{}' is still {}", batch_name, other),
                ));
            }
        }

        let batches = self.store.batches();
        if !batches
            .transition(record.id, record.status, BatchStatus::Sorting, Utc::now())
            .await?
        {
            let current = self.find_batch(batch_name).await?;
            return Ok(SortResult::not_started(
                batch_name,
                format!("Batch '{}' changed to {} concurrently", batch_name, current.status),
            ));
        }

        let files = self
            .store
            .files()
            .find_by_batch(record.id, &READY_STATUSES)
            .await?;

        let (mut sorted, mut skipped) = (0u64, 0u64);
        for file in files {
            if self.sort_file(file).await? {
                sorted += 1;
            } else {
                skipped += 1;
            }
        }

        batches
            .transition(record.id, BatchStatus::Sorting, BatchStatus::Sorted, Utc::now())
            .await?;
        info!(batch = %batch_name, sorted, skipped, "Batch sorted");

        Ok(SortResult {
            batch: batch_name.to_string(),
            started: true,
            sorted_files: sorted,
            skipped_files: skipped,
            reason: None,
        })
    }

    pub async fn status(&self, batch_name: &str) -> Result<SortStatus> {
        let record = self.find_batch(batch_name).await?;
        let counts = self.store.files().batch_counts(record.id).await?;
        Ok(SortStatus {
            batch: record.name,
            status: record.status,
            total_files: counts.total.max(0) as u64,
            sorted_files: counts.sorted.max(0) as u64,
        })
    }

    /// Returns whether the file ended up sorted.
    ///
    /// Store failures stay with the file: the relocation is reverted, the
    /// row is marked `error` and the file counts as skipped.
    async fn sort_file(&self, file: FileRecord) -> Result<bool> {
        let settings = self.settings.clone();
        let source = PathBuf::from(&file.path);
        let stored = file.capture_ts;
        let dating = {
            let source = source.clone();
            tokio::task::spawn_blocking(move || date_file(&settings, &source, stored)).await?
        };

        let files = self.store.files();
        let (dest_dir, captured) = match dating {
            Dating::Skipped => return Ok(false),
            Dating::InPlace { captured } => {
                if let Err(e) = files.mark_sorted(&file.path, &file.path, Some(captured)).await {
                    self.contain_failure(&file.path, &e).await;
                    return Ok(false);
                }
                return Ok(true);
            }
            Dating::Dated { dest_dir, captured } => (dest_dir, captured),
        };

        let Some(file_name) = source.file_name() else {
            return Ok(false);
        };
        let dest = match self.free_destination(&dest_dir, file_name).await {
            Ok(dest) => dest,
            Err(e) => {
                self.contain_failure(&file.path, &e).await;
                return Ok(false);
            }
        };

        let mode = self.settings.transfer_mode;
        let relocated = {
            let (source, dest) = (source.clone(), dest.clone());
            tokio::task::spawn_blocking(move || relocate(&source, &dest, mode)).await?
        };
        if let Err(e) = relocated {
            warn!(path = %file.path, dest = %dest.display(), error = %e, "Failed to relocate file");
            return Ok(false);
        }

        let dest_str = dest.to_string_lossy();
        let recorded = match mode {
            TransferMode::Move => files.mark_sorted(&file.path, &dest_str, Some(captured)).await,
            TransferMode::Copy => {
                files
                    .record_sorted_copy(&file.path, &dest_str, Some(captured))
                    .await
            }
        };
        if let Err(e) = recorded {
            let reverted = {
                let dest = dest.clone();
                tokio::task::spawn_blocking(move || undo_relocation(&source, &dest, mode)).await?
            };
            if let Err(undo) = reverted {
                warn!(path = %file.path, dest = %dest_str, error = %undo, "Failed to revert relocation");
            }
            self.contain_failure(&file.path, &e).await;
            return Ok(false);
        }

        debug!(from = %file.path, to = %dest_str, "File sorted");
        Ok(true)
    }

    /// First candidate name that is neither on disk nor tracked by a row.
    async fn free_destination(
        &self,
        dir: &Path,
        file_name: &OsStr,
    ) -> core_library::Result<PathBuf> {
        for candidate in destination_candidates(dir, file_name) {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(true) {
                continue;
            }
            let tracked = self
                .store
                .files()
                .find_by_path(&candidate.to_string_lossy())
                .await?;
            if tracked.is_none() {
                return Ok(candidate);
            }
        }
        Ok(dir.join(file_name))
    }

    async fn contain_failure(&self, path: &str, error: &LibraryError) {
        warn!(path = %path, error = %error, "Failed to record sorted file");
        if let Err(e) = self.store.files().mark_error(path, &error.to_string()).await {
            warn!(path = %path, error = %e, "Failed to mark file as errored");
        }
    }

    async fn find_batch(&self, batch_name: &str) -> Result<BatchRecord> {
        self.store
            .batches()
            .find_by_name(batch_name)
            .await?
            .ok_or_else(|| SortError::BatchNotFound(batch_name.to_string()))
    }
}

/// Capture time and destination directory of one file. Blocking.
fn date_file(settings: &SortSettings, source: &Path, stored: Option<DateTime<Utc>>) -> Dating {
    if !source.is_file() {
        warn!(path = %source.display(), "Skipping missing file during sort");
        return Dating::Skipped;
    }

    let captured = match resolve_capture_time(source, stored, settings.exif_fallback) {
        Ok(Some((captured, origin))) => {
            debug!(path = %source.display(), ?origin, "Capture time resolved");
            captured
        }
        Ok(None) => {
            warn!(path = %source.display(), "Unable to determine capture date");
            return Dating::Skipped;
        }
        Err(e) => {
            warn!(path = %source.display(), error = %e, "Unable to determine capture date");
            return Dating::Skipped;
        }
    };

    let Some(file_name) = source.file_name() else {
        return Dating::Skipped;
    };
    let dest_dir = settings
        .sorted_dir
        .join(settings.folder_pattern.format(&captured));
    if dest_dir.join(file_name) == source {
        return Dating::InPlace { captured };
    }
    Dating::Dated { dest_dir, captured }
}
