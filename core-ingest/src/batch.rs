//! # Batch Allocator
//!
//! Groups unique, unbatched files into a new batch directory.
//!
//! ## Overview
//!
//! A batch is created in four steps:
//! 1. The exclusivity guard refuses to allocate while another batch is still
//!    in flight (unless parallel batches are allowed).
//! 2. Candidates are selected in path order against the size or count
//!    budget (see [`crate::selection`]).
//! 3. Selected files are moved or copied into `batch_dir/<name>/`, mirroring
//!    their path relative to the source root, and `manifest.json` is written.
//! 4. The `pending` batch row and the file updates are committed in one
//!    transaction.
//!
//! Files that disappear along the way are skipped and named in the result.
//! If the insert loses a race on the batch name the relocated files are put
//! back before returning.

use crate::error::{IngestError, Result};
use crate::manifest::{BatchFileEntry, BatchManifest, MANIFEST_FILE_NAME};
use crate::selection::{select_within_limits, SelectionLimits};
use chrono::{DateTime, Utc};
use core_library::transfer::relocate;
use core_library::{
    BatchAssignment, BatchRecord, BatchStatus, FileRecord, LibraryError, NewBatch, PipelineStore,
};
use core_runtime::config::{PipelineConfig, TransferMode};
use core_runtime::pattern::NamingPattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

pub const NO_ELIGIBLE_FILES: &str = "No eligible files for batching";
const NOTHING_MOVED: &str = "No files could be moved into the batch";

/// A candidate left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

impl SkippedFile {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of [`BatchAllocator::create_batch`].
///
/// `created == false` is a normal result: `reason` explains it, and the
/// `blocking_*` fields are set when the exclusivity guard tripped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCreationResult {
    pub created: bool,
    pub batch_id: Option<i64>,
    pub batch_name: Option<String>,
    pub file_count: u64,
    pub size_bytes: u64,
    pub manifest_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub files: Vec<BatchFileEntry>,
    pub skipped: Vec<SkippedFile>,
    pub reason: Option<String>,
    pub blocking_batch: Option<String>,
    pub blocking_batch_id: Option<i64>,
    pub blocking_status: Option<BatchStatus>,
}

impl BatchCreationResult {
    fn not_created(reason: impl Into<String>, skipped: Vec<SkippedFile>) -> Self {
        Self {
            reason: Some(reason.into()),
            skipped,
            ..Self::default()
        }
    }

    fn blocked(batch: &BatchRecord) -> Self {
        Self {
            reason: Some(format!("Batch '{}' is still {}", batch.name, batch.status)),
            blocking_batch: Some(batch.name.clone()),
            blocking_batch_id: Some(batch.id),
            blocking_status: Some(batch.status),
            ..Self::default()
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocking_batch.is_some()
    }
}

/// Inputs of an allocation.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub source_dir: PathBuf,
    pub batch_dir: PathBuf,
    pub naming: NamingPattern,
    pub limits: SelectionLimits,
    pub allow_parallel: bool,
    pub transfer_mode: TransferMode,
}

impl BatchSettings {
    /// # Errors
    ///
    /// [`IngestError::Config`] when the naming pattern is invalid.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            source_dir: config.paths.source_dir.clone(),
            batch_dir: config.paths.batch_dir.clone(),
            naming: config.naming_pattern()?,
            limits: SelectionLimits::from_config(config),
            allow_parallel: config.batch.allow_parallel,
            transfer_mode: config.batch.transfer_mode,
        })
    }
}

struct Candidate {
    path: String,
    size: u64,
    fingerprint: Option<String>,
}

/// Creates batches from the files dedup marked `unique`.
pub struct BatchAllocator {
    store: PipelineStore,
    settings: BatchSettings,
}

impl BatchAllocator {
    pub fn new(store: PipelineStore, settings: BatchSettings) -> Self {
        Self { store, settings }
    }

    pub fn from_config(store: PipelineStore, config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(store, BatchSettings::from_config(config)?))
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    #[instrument(skip(self), fields(batch_dir = %self.settings.batch_dir.display()))]
    pub async fn create_batch(&self) -> Result<BatchCreationResult> {
        if !self.settings.allow_parallel {
            if let Some(blocking) = self.store.batches().find_blocking().await? {
                info!(batch = %blocking.name, status = %blocking.status, "Batch allocation blocked");
                return Ok(BatchCreationResult::blocked(&blocking));
            }
        }

        let records = self.store.files().batch_candidates().await?;
        let (candidates, mut skipped) = resolve_sizes(records).await?;

        let sizes: Vec<u64> = candidates.iter().map(|c| c.size).collect();
        let selection = select_within_limits(&sizes, self.settings.limits);
        for &index in &selection.oversized {
            let candidate = &candidates[index];
            warn!(
                path = %candidate.path,
                size = candidate.size,
                budget = self.settings.limits.max_bytes,
                "File exceeds the batch budget"
            );
            skipped.push(SkippedFile::new(&candidate.path, "Larger than the batch size budget"));
        }

        if selection.selected.is_empty() {
            debug!(skipped = skipped.len(), "Nothing to batch");
            return Ok(BatchCreationResult::not_created(NO_ELIGIBLE_FILES, skipped));
        }

        let name = self.next_batch_name().await?;
        let batch_path = self.settings.batch_dir.join(&name);
        let selected: Vec<Candidate> = {
            let mut by_index: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
            selection
                .selected
                .iter()
                .filter_map(|&i| by_index[i].take())
                .collect()
        };

        let (entries, relocation_skips) = {
            let source_dir = self.settings.source_dir.clone();
            let batch_path = batch_path.clone();
            let mode = self.settings.transfer_mode;
            tokio::task::spawn_blocking(move || {
                place_files(&source_dir, &batch_path, &selected, mode)
            })
            .await??
        };
        skipped.extend(relocation_skips);

        if entries.is_empty() {
            let removed = {
                let batch_path = batch_path.clone();
                tokio::task::spawn_blocking(move || remove_empty_dirs(&batch_path)).await?
            };
            if !removed {
                warn!(path = %batch_path.display(), "Discarded batch directory could not be removed");
            }
            warn!(batch = %name, "No files were moved, batch discarded");
            return Ok(BatchCreationResult::not_created(NOTHING_MOVED, skipped));
        }

        let created_at = Utc::now();
        let manifest = BatchManifest::new(name.clone(), created_at, entries);
        let manifest_path = batch_path.join(MANIFEST_FILE_NAME);
        if let Err(e) = manifest.write(&manifest_path) {
            self.roll_back(&batch_path, &manifest.files).await;
            return Err(e);
        }

        let assignments: Vec<BatchAssignment> = manifest
            .files
            .iter()
            .map(|entry| BatchAssignment {
                source_path: entry.source_path.clone(),
                batch_path: entry.batch_path.clone(),
                size: entry.size as i64,
            })
            .collect();
        let new_batch = NewBatch {
            name: name.clone(),
            created_at,
            manifest_path: Some(manifest_path.to_string_lossy().into_owned()),
        };

        let record = match self
            .store
            .batches()
            .create_with_files(&new_batch, &assignments, self.settings.transfer_mode)
            .await
        {
            Ok(record) => record,
            Err(LibraryError::Conflict(message)) => {
                warn!(batch = %name, %message, "Batch name taken concurrently, rolling back");
                self.roll_back(&batch_path, &manifest.files).await;
                return Ok(BatchCreationResult::not_created(message, skipped));
            }
            Err(e) => {
                self.roll_back(&batch_path, &manifest.files).await;
                return Err(e.into());
            }
        };

        info!(
            batch = %record.name,
            batch_id = record.id,
            files = manifest.file_count,
            bytes = manifest.size_bytes,
            skipped = skipped.len(),
            "Batch created"
        );

        Ok(BatchCreationResult {
            created: true,
            batch_id: Some(record.id),
            batch_name: Some(record.name),
            file_count: manifest.file_count,
            size_bytes: manifest.size_bytes,
            manifest_path: new_batch.manifest_path,
            created_at: Some(created_at),
            files: manifest.files,
            skipped,
            ..BatchCreationResult::default()
        })
    }

    /// First name from the pattern that is neither stored nor on disk.
    async fn next_batch_name(&self) -> Result<String> {
        let taken: HashSet<String> = self.store.batches().names().await?.into_iter().collect();
        (1u64..=u32::MAX as u64)
            .map(|index| self.settings.naming.format(index))
            .find(|name| !taken.contains(name) && !self.settings.batch_dir.join(name).exists())
            .ok_or_else(|| {
                IngestError::Config(format!(
                    "Naming pattern '{}' has no free batch name",
                    self.settings.naming.as_str()
                ))
            })
    }

    async fn roll_back(&self, batch_path: &Path, entries: &[BatchFileEntry]) {
        let batch_path = batch_path.to_path_buf();
        let entries = entries.to_vec();
        let mode = self.settings.transfer_mode;
        let result = tokio::task::spawn_blocking(move || undo_placement(&batch_path, &entries, mode)).await;
        if let Err(e) = result {
            warn!(error = %e, "Batch rollback task failed");
        }
    }
}

/// Fill in missing sizes from the filesystem; vanished files are skipped.
async fn resolve_sizes(records: Vec<FileRecord>) -> Result<(Vec<Candidate>, Vec<SkippedFile>)> {
    let mut candidates = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();

    for record in records {
        let size = match record.size.filter(|size| *size > 0) {
            Some(size) => size as u64,
            None => match tokio::fs::metadata(&record.path).await {
                Ok(metadata) => metadata.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %record.path, "Batch candidate missing from source");
                    skipped.push(SkippedFile::new(record.path, "File missing from source"));
                    continue;
                }
                Err(e) => return Err(e.into()),
            },
        };
        candidates.push(Candidate {
            path: record.path,
            size,
            fingerprint: record.fingerprint,
        });
    }

    Ok((candidates, skipped))
}

fn place_files(
    source_dir: &Path,
    batch_path: &Path,
    selected: &[Candidate],
    mode: TransferMode,
) -> Result<(Vec<BatchFileEntry>, Vec<SkippedFile>)> {
    fs::create_dir_all(batch_path)?;

    let mut entries = Vec::with_capacity(selected.len());
    let mut skipped = Vec::new();
    for candidate in selected {
        let source = Path::new(&candidate.path);
        let relative = relative_to_source(source_dir, source);
        let dest = batch_path.join(&relative);
        if !source.is_file() {
            warn!(path = %candidate.path, "File vanished before relocation");
            skipped.push(SkippedFile::new(&candidate.path, "File missing during relocation"));
            continue;
        }

        match relocate(source, &dest, mode) {
            Ok(()) => entries.push(BatchFileEntry {
                source_path: candidate.path.clone(),
                batch_path: dest.to_string_lossy().into_owned(),
                relative_path: relative.to_string_lossy().into_owned(),
                size: candidate.size,
                fingerprint: candidate.fingerprint.clone(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %candidate.path, "File vanished before relocation");
                skipped.push(SkippedFile::new(&candidate.path, "File missing during relocation"));
            }
            Err(e) => {
                warn!(path = %candidate.path, error = %e, "Failed to relocate file");
                skipped.push(SkippedFile::new(&candidate.path, e.to_string()));
            }
        }
    }

    Ok((entries, skipped))
}

/// Path of `source` below the source root, or just its file name when it
/// lives elsewhere.
fn relative_to_source(source_dir: &Path, source: &Path) -> PathBuf {
    match source.strip_prefix(source_dir) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
        _ => source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| source.to_path_buf()),
    }
}

fn undo_placement(batch_path: &Path, entries: &[BatchFileEntry], mode: TransferMode) {
    for entry in entries {
        let placed = Path::new(&entry.batch_path);
        let result = match mode {
            TransferMode::Move => relocate(placed, Path::new(&entry.source_path), TransferMode::Move),
            TransferMode::Copy => fs::remove_file(placed),
        };
        if let Err(e) = result {
            warn!(path = %entry.batch_path, error = %e, "Rollback could not restore file");
        }
    }

    let manifest = batch_path.join(MANIFEST_FILE_NAME);
    if let Err(e) = fs::remove_file(&manifest) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %manifest.display(), error = %e, "Rollback could not remove manifest");
        }
    }
    if !remove_empty_dirs(batch_path) {
        warn!(path = %batch_path.display(), "Rolled back batch directory kept, it is not empty");
    }
}

/// Remove `root` and every directory below it that is empty, deepest first.
///
/// Directories that still hold files stay for inspection. Returns whether
/// `root` itself is gone.
fn remove_empty_dirs(root: &Path) -> bool {
    for entry in WalkDir::new(root).contents_first(true).into_iter().flatten() {
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Err(e) = fs::remove_dir(entry.path()) {
            debug!(path = %entry.path().display(), error = %e, "Directory kept");
        }
    }
    !root.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_empty_dirs_keeps_populated_branches() {
        let root = tempfile::tempdir().unwrap();
        let batch = root.path().join("batch_001");
        fs::create_dir_all(batch.join("2024/06")).unwrap();
        assert!(remove_empty_dirs(&batch));
        assert!(!batch.exists());

        fs::create_dir_all(batch.join("2024/06")).unwrap();
        fs::create_dir_all(batch.join("2023")).unwrap();
        fs::write(batch.join("2024/06/a.jpg"), b"a").unwrap();
        assert!(!remove_empty_dirs(&batch));
        assert!(batch.join("2024/06/a.jpg").exists());
        assert!(!batch.join("2023").exists());
    }

    #[test]
    fn test_relative_path_mirrors_source_tree() {
        let relative = relative_to_source(Path::new("/src"), Path::new("/src/2024/a.jpg"));
        assert_eq!(relative, PathBuf::from("2024/a.jpg"));

        let outside = relative_to_source(Path::new("/src"), Path::new("/elsewhere/b.jpg"));
        assert_eq!(outside, PathBuf::from("b.jpg"));
    }

    #[test]
    fn test_blocked_result_names_batch() {
        let batch = BatchRecord {
            id: 3,
            name: "batch_003".to_string(),
            size_bytes: 10,
            file_count: 1,
            status: BatchStatus::Syncing,
            created_at: None,
            synced_at: None,
            sorted_at: None,
            manifest_path: None,
        };

        let result = BatchCreationResult::blocked(&batch);
        assert!(!result.created);
        assert!(result.is_blocked());
        assert_eq!(result.reason.as_deref(), Some("Batch 'batch_003' is still syncing"));
        assert_eq!(result.blocking_batch_id, Some(3));
        assert_eq!(result.blocking_status, Some(BatchStatus::Syncing));
    }

    #[test]
    fn test_undo_placement_restores_moved_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src/a.jpg");
        let batch_path = dir.path().join("batches/batch_001");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, b"data").unwrap();

        let candidate = Candidate {
            path: source.to_string_lossy().into_owned(),
            size: 4,
            fingerprint: None,
        };
        let (entries, skipped) = place_files(
            &dir.path().join("src"),
            &batch_path,
            std::slice::from_ref(&candidate),
            TransferMode::Move,
        )
        .unwrap();
        assert!(skipped.is_empty());
        assert!(!source.exists());

        undo_placement(&batch_path, &entries, TransferMode::Move);
        assert!(source.exists());
        assert!(!batch_path.exists());
    }
}
