//! # Deduplication Engine
//!
//! Walks the source tree, fingerprints every file it has not classified yet
//! and marks each one `unique` or `duplicate`.
//!
//! ## Overview
//!
//! The persisted file status is the only checkpoint. Files already settled
//! (anything but `new` and `error`) are never hashed again, so an interrupted
//! scan simply resumes on the next run. Each file is recorded as `new`
//! before hashing starts; a crash mid-hash leaves a row the next scan picks
//! up again.
//!
//! Only one scan runs per engine. [`DedupEngine::start`] returns `false`
//! instead of queuing a second one, and [`DedupEngine::status`] can be read
//! at any time while the scan is running.
//!
//! ## Canonical selection
//!
//! Files are visited in path order. With [`CanonicalPolicy::FirstSeen`] the
//! first file fingerprinted keeps `unique`; with
//! [`CanonicalPolicy::LowestPath`] a newly seen file whose path sorts first
//! takes over from a canonical that has not been batched yet.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use core_library::{FileRecord, FileStatus, ObservedFile, PipelineStore};
use core_metadata::{ContentHasher, MetadataError};
use core_runtime::config::{CanonicalPolicy, PipelineConfig};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

/// Live snapshot of the current (or last) scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupProgress {
    pub running: bool,
    pub total_files: u64,
    pub processed_files: u64,
    pub duplicate_files: u64,
    pub error_files: u64,
    /// Files that vanished before they could be classified
    pub skipped_files: u64,
    /// Scan-level failure; per-file failures only bump `error_files`
    pub error: Option<String>,
    pub last_processed: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of [`DedupEngine::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    Completed(DedupProgress),
    /// Another scan was active; carries its progress at the time of the call
    AlreadyRunning(DedupProgress),
}

impl DedupOutcome {
    pub fn progress(&self) -> &DedupProgress {
        match self {
            DedupOutcome::Completed(progress) | DedupOutcome::AlreadyRunning(progress) => progress,
        }
    }

    pub fn started(&self) -> bool {
        matches!(self, DedupOutcome::Completed(_))
    }
}

/// Inputs of a scan.
#[derive(Debug, Clone)]
pub struct DedupSettings {
    pub source_dir: PathBuf,
    pub hasher: ContentHasher,
    pub canonical_policy: CanonicalPolicy,
}

impl DedupSettings {
    /// # Errors
    ///
    /// [`IngestError::Config`] for an unsupported hash algorithm.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            source_dir: config.paths.source_dir.clone(),
            hasher: ContentHasher::from_name(&config.dedup.hash_algorithm)?,
            canonical_policy: config.dedup.canonical_policy,
        })
    }
}

type ScanHandle = Shared<BoxFuture<'static, ()>>;

struct DedupInner {
    store: PipelineStore,
    settings: DedupSettings,
    progress: RwLock<DedupProgress>,
    task: Mutex<Option<ScanHandle>>,
}

/// Resumable content-hash deduplication over the source directory.
#[derive(Clone)]
pub struct DedupEngine {
    inner: Arc<DedupInner>,
}

impl DedupEngine {
    pub fn new(store: PipelineStore, settings: DedupSettings) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                store,
                settings,
                progress: RwLock::new(DedupProgress::default()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(store: PipelineStore, config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(store, DedupSettings::from_config(config)?))
    }

    pub fn source_dir(&self) -> &Path {
        &self.inner.settings.source_dir
    }

    /// Start a background scan. Returns `false` if one is already running.
    pub async fn start(&self) -> bool {
        let mut task = self.inner.task.lock().await;
        {
            let mut progress = self.inner.progress.write().await;
            if progress.running {
                return false;
            }
            *progress = DedupProgress {
                running: true,
                started_at: Some(Utc::now()),
                ..DedupProgress::default()
            };
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.execute().await });
        *task = Some(handle.map(|_| ()).boxed().shared());
        true
    }

    /// Wait for the active scan, if any, to finish.
    pub async fn wait_for_completion(&self) {
        let handle = self.inner.task.lock().await.clone();
        if let Some(handle) = handle {
            handle.await;
        }
    }

    /// Start a scan and wait for it.
    pub async fn run(&self) -> DedupOutcome {
        if !self.start().await {
            return DedupOutcome::AlreadyRunning(self.status().await);
        }
        self.wait_for_completion().await;
        DedupOutcome::Completed(self.status().await)
    }

    pub async fn status(&self) -> DedupProgress {
        self.inner.progress.read().await.clone()
    }
}

impl DedupInner {
    async fn execute(&self) {
        let result = self.scan().await;

        let mut progress = self.progress.write().await;
        if let Err(e) = result {
            error!(error = %e, source = %self.settings.source_dir.display(), "Dedup scan failed");
            progress.error = Some(e.to_string());
        }
        progress.running = false;
        progress.finished_at = Some(Utc::now());
        info!(
            total = progress.total_files,
            processed = progress.processed_files,
            duplicates = progress.duplicate_files,
            errors = progress.error_files,
            skipped = progress.skipped_files,
            "Dedup scan finished"
        );
    }

    #[instrument(skip(self), fields(source = %self.settings.source_dir.display()))]
    async fn scan(&self) -> Result<()> {
        let source_dir = self.settings.source_dir.clone();
        let files = tokio::task::spawn_blocking(move || discover_files(&source_dir)).await??;
        let settled = self.store.files().settled_statuses().await?;

        let (mut processed, mut duplicates) = (0u64, 0u64);
        for path in &files {
            if let Some(status) = settled.get(&path_key(path)) {
                processed += 1;
                if *status == FileStatus::Duplicate {
                    duplicates += 1;
                }
            }
        }
        {
            let mut progress = self.progress.write().await;
            progress.total_files = files.len() as u64;
            progress.processed_files = processed;
            progress.duplicate_files = duplicates;
        }
        debug!(total = files.len(), already_classified = processed, "Discovered source files");

        for path in files {
            if settled.contains_key(&path_key(&path)) {
                continue;
            }
            if let Err(e) = self.process_file(&path).await {
                self.contain_failure(&path_key(&path), &e).await;
            }
        }

        Ok(())
    }

    async fn process_file(&self, path: &Path) -> Result<()> {
        let key = path_key(path);
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %key, "File vanished before hashing");
                self.skip(&key).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let files = self.store.files();
        files
            .upsert_observed(&ObservedFile {
                path: key.clone(),
                size: metadata.len() as i64,
                ctime: metadata.created().ok().and_then(epoch_seconds),
                mtime: metadata.modified().ok().and_then(epoch_seconds),
            })
            .await?;

        let hasher = self.settings.hasher;
        let owned = path.to_path_buf();
        let fingerprint = match tokio::task::spawn_blocking(move || hasher.hash_file(&owned)).await? {
            Ok(fingerprint) => fingerprint,
            Err(MetadataError::FileNotFound(_)) => {
                warn!(path = %key, "File vanished before hashing");
                files.discard_new(&key).await?;
                self.skip(&key).await;
                return Ok(());
            }
            Err(e) => {
                warn!(path = %key, error = %e, "Failed to hash file");
                files.mark_error(&key, &e.to_string()).await?;
                self.bump(&key, false, true).await;
                return Ok(());
            }
        };

        let existing = files.find_by_fingerprint(&fingerprint, &key).await?;
        // A fingerprint group keeps exactly one canonical, so any match adds
        // one duplicate overall whichever side ends up canonical.
        let duplicate_found = existing.is_some();
        let status = match existing {
            None => FileStatus::Unique,
            Some(existing) if self.takes_over(&key, &existing) => {
                debug!(path = %key, previous = %existing.path, "Lower path takes over as canonical");
                files.set_status(&existing.path, FileStatus::Duplicate).await?;
                FileStatus::Unique
            }
            Some(existing) => {
                if !existing.status.is_canonical() {
                    files.set_status(&existing.path, FileStatus::Unique).await?;
                }
                FileStatus::Duplicate
            }
        };

        files.classify(&key, &fingerprint, status).await?;
        self.bump(&key, duplicate_found, false).await;
        debug!(path = %key, status = %status, "File classified");
        Ok(())
    }

    /// Whether `path` should replace `existing` as the canonical copy.
    fn takes_over(&self, path: &str, existing: &FileRecord) -> bool {
        self.settings.canonical_policy == CanonicalPolicy::LowestPath
            && existing.status == FileStatus::Unique
            && existing.batch_id.is_none()
            && path < existing.path.as_str()
    }

    /// Record a per-file failure on the row and keep scanning.
    async fn contain_failure(&self, key: &str, error: &IngestError) {
        warn!(path = %key, error = %error, "Failed to classify file");
        if let Err(e) = self.store.files().mark_error(key, &error.to_string()).await {
            warn!(path = %key, error = %e, "Failed to mark file as errored");
        }
        self.bump(key, false, true).await;
    }

    async fn skip(&self, path: &str) {
        let mut progress = self.progress.write().await;
        progress.skipped_files += 1;
        progress.last_processed = Some(path.to_string());
    }

    async fn bump(&self, path: &str, duplicate: bool, failed: bool) {
        let mut progress = self.progress.write().await;
        progress.processed_files += 1;
        if duplicate {
            progress.duplicate_files += 1;
        }
        if failed {
            progress.error_files += 1;
        }
        progress.last_processed = Some(path.to_string());
    }
}

/// Every regular file under `root`, sorted by path.
fn discover_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(IngestError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Source directory '{}' does not exist", root.display()),
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn epoch_seconds(time: SystemTime) -> Option<f64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs_f64())
}
