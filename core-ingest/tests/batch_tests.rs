//! Batch allocation against a temporary filesystem and an in-memory store.

use core_ingest::{
    BatchAllocator, BatchManifest, BatchSettings, SelectionLimits, NO_ELIGIBLE_FILES,
};
use core_library::{BatchStatus, FileStatus, ObservedFile, PipelineStore};
use core_runtime::config::{OversizedPolicy, TransferMode};
use core_runtime::pattern::NamingPattern;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    source: PathBuf,
    batches: PathBuf,
    store: PipelineStore,
}

impl Fixture {
    async fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("source");
        let batches = root.path().join("batches");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&batches).unwrap();
        Self {
            source,
            batches,
            store: PipelineStore::in_memory().await.unwrap(),
            _root: root,
        }
    }

    fn settings(&self, limits: SelectionLimits) -> BatchSettings {
        BatchSettings {
            source_dir: self.source.clone(),
            batch_dir: self.batches.clone(),
            naming: NamingPattern::parse("batch_{index:03d}").unwrap(),
            limits,
            allow_parallel: false,
            transfer_mode: TransferMode::Move,
        }
    }

    fn allocator(&self, settings: BatchSettings) -> BatchAllocator {
        BatchAllocator::new(self.store.clone(), settings)
    }

    /// Write a file of `size` bytes and register it as a unique candidate.
    async fn unique_file(&self, relative: &str, size: usize) -> String {
        let path = self.source.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![b'x'; size]).unwrap();
        let key = path.to_string_lossy().into_owned();

        let files = self.store.files();
        files
            .upsert_observed(&ObservedFile {
                path: key.clone(),
                size: size as i64,
                ctime: None,
                mtime: None,
            })
            .await
            .unwrap();
        files
            .classify(&key, &format!("fp-{}", relative), FileStatus::Unique)
            .await
            .unwrap();
        key
    }
}

#[tokio::test]
async fn test_byte_budget_takes_leading_small_files() {
    let fx = Fixture::new().await;
    let a = fx.unique_file("a.jpg", 1).await;
    let b = fx.unique_file("b.jpg", 1).await;
    let c = fx.unique_file("c.jpg", 5).await;

    let result = fx
        .allocator(fx.settings(SelectionLimits::bytes(2)))
        .create_batch()
        .await
        .unwrap();

    assert!(result.created);
    assert_eq!(result.batch_name.as_deref(), Some("batch_001"));
    assert_eq!(result.file_count, 2);
    assert_eq!(result.size_bytes, 2);
    let sources: Vec<_> = result.files.iter().map(|f| f.source_path.as_str()).collect();
    assert_eq!(sources, vec![a.as_str(), b.as_str()]);

    let batch_path = fx.batches.join("batch_001");
    assert!(batch_path.join("a.jpg").exists());
    assert!(batch_path.join("b.jpg").exists());
    assert!(!Path::new(&a).exists());
    assert!(Path::new(&c).exists());

    let batch = fx.store.batches().find_by_name("batch_001").await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);
    assert_eq!(batch.file_count, 2);
    assert_eq!(Some(batch.id), result.batch_id);

    let moved = fx
        .store
        .files()
        .find_by_path(&batch_path.join("a.jpg").to_string_lossy())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.status, FileStatus::Batched);
    assert_eq!(moved.batch_id, Some(batch.id));

    let remaining = fx.store.files().find_by_path(&c).await.unwrap().unwrap();
    assert_eq!(remaining.status, FileStatus::Unique);
    assert_eq!(remaining.batch_id, None);
}

#[tokio::test]
async fn test_manifest_matches_batch() {
    let fx = Fixture::new().await;
    fx.unique_file("2024/03/a.jpg", 3).await;
    fx.unique_file("b.jpg", 4).await;

    let result = fx
        .allocator(fx.settings(SelectionLimits::bytes(100)))
        .create_batch()
        .await
        .unwrap();

    let manifest_path = PathBuf::from(result.manifest_path.unwrap());
    assert_eq!(manifest_path, fx.batches.join("batch_001/manifest.json"));

    let manifest = BatchManifest::load(&manifest_path).unwrap();
    assert_eq!(manifest.batch, "batch_001");
    assert_eq!(manifest.file_count, 2);
    assert_eq!(manifest.size_bytes, 7);
    assert_eq!(manifest.files[0].relative_path, "2024/03/a.jpg");
    assert_eq!(manifest.files[0].fingerprint.as_deref(), Some("fp-2024/03/a.jpg"));
    assert!(fx.batches.join("batch_001/2024/03/a.jpg").exists());
}

#[tokio::test]
async fn test_second_allocation_is_blocked_by_pending_batch() {
    let fx = Fixture::new().await;
    fx.unique_file("a.jpg", 1).await;
    fx.unique_file("b.jpg", 1).await;

    let allocator = fx.allocator(fx.settings(SelectionLimits::files(1)));
    let first = allocator.create_batch().await.unwrap();
    assert!(first.created);

    let second = allocator.create_batch().await.unwrap();
    assert!(!second.created);
    assert!(second.is_blocked());
    assert_eq!(second.blocking_batch.as_deref(), Some("batch_001"));
    assert_eq!(second.blocking_batch_id, first.batch_id);
    assert_eq!(second.blocking_status, Some(BatchStatus::Pending));
    assert_eq!(second.reason.as_deref(), Some("Batch 'batch_001' is still pending"));
    assert!(!fx.batches.join("batch_002").exists());
}

#[tokio::test]
async fn test_parallel_allocation_uses_next_name() {
    let fx = Fixture::new().await;
    fx.unique_file("a.jpg", 1).await;
    fx.unique_file("b.jpg", 1).await;

    let mut settings = fx.settings(SelectionLimits::files(1));
    settings.allow_parallel = true;
    let allocator = fx.allocator(settings);

    assert_eq!(
        allocator.create_batch().await.unwrap().batch_name.as_deref(),
        Some("batch_001")
    );
    assert_eq!(
        allocator.create_batch().await.unwrap().batch_name.as_deref(),
        Some("batch_002")
    );
    let third = allocator.create_batch().await.unwrap();
    assert!(!third.created);
    assert_eq!(third.reason.as_deref(), Some(NO_ELIGIBLE_FILES));
}

#[tokio::test]
async fn test_name_already_on_disk_is_not_reused() {
    let fx = Fixture::new().await;
    fx.unique_file("a.jpg", 1).await;
    fs::create_dir_all(fx.batches.join("batch_001")).unwrap();

    let result = fx
        .allocator(fx.settings(SelectionLimits::bytes(10)))
        .create_batch()
        .await
        .unwrap();
    assert_eq!(result.batch_name.as_deref(), Some("batch_002"));
}

#[tokio::test]
async fn test_oversized_file_is_skipped_with_reason() {
    let fx = Fixture::new().await;
    let big = fx.unique_file("big.mov", 50).await;

    let result = fx
        .allocator(fx.settings(SelectionLimits::bytes(10)))
        .create_batch()
        .await
        .unwrap();

    assert!(!result.created);
    assert_eq!(result.reason.as_deref(), Some(NO_ELIGIBLE_FILES));
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].path, big);
    assert!(Path::new(&big).exists());
    assert!(!fx.batches.join("batch_001").exists());
}

#[tokio::test]
async fn test_isolate_policy_batches_oversized_file_alone() {
    let fx = Fixture::new().await;
    fx.unique_file("big.mov", 50).await;
    fx.unique_file("small.jpg", 1).await;

    let limits = SelectionLimits {
        oversized: OversizedPolicy::Isolate,
        ..SelectionLimits::bytes(10)
    };
    let result = fx.allocator(fx.settings(limits)).create_batch().await.unwrap();

    assert!(result.created);
    assert_eq!(result.file_count, 1);
    assert_eq!(result.size_bytes, 50);
    assert!(fx.batches.join("batch_001/big.mov").exists());
}

#[tokio::test]
async fn test_copy_mode_archives_original() {
    let fx = Fixture::new().await;
    let source = fx.unique_file("a.jpg", 2).await;

    let mut settings = fx.settings(SelectionLimits::bytes(10));
    settings.transfer_mode = TransferMode::Copy;
    let result = fx.allocator(settings).create_batch().await.unwrap();
    assert!(result.created);

    let copy = fx.batches.join("batch_001/a.jpg");
    assert!(Path::new(&source).exists());
    assert!(copy.exists());

    let original = fx.store.files().find_by_path(&source).await.unwrap().unwrap();
    assert_eq!(original.status, FileStatus::Archived);
    assert_eq!(original.batch_id, None);
    assert_eq!(original.target_path.as_deref(), Some(copy.to_string_lossy().as_ref()));

    let copied = fx
        .store
        .files()
        .find_by_path(&copy.to_string_lossy())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(copied.status, FileStatus::Batched);
    assert_eq!(copied.batch_id, result.batch_id);
}

#[tokio::test]
async fn test_vanished_files_are_skipped() {
    let fx = Fixture::new().await;
    let gone = fx.unique_file("a.jpg", 1).await;
    fx.unique_file("b.jpg", 1).await;
    fs::remove_file(&gone).unwrap();

    let result = fx
        .allocator(fx.settings(SelectionLimits::bytes(10)))
        .create_batch()
        .await
        .unwrap();

    assert!(result.created);
    assert_eq!(result.file_count, 1);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].path, gone);
}

#[tokio::test]
async fn test_nothing_moved_leaves_no_batch_behind() {
    let fx = Fixture::new().await;
    let gone = fx.unique_file("a.jpg", 1).await;
    fs::remove_file(&gone).unwrap();

    let result = fx
        .allocator(fx.settings(SelectionLimits::bytes(10)))
        .create_batch()
        .await
        .unwrap();

    assert!(!result.created);
    assert!(result.reason.is_some());
    assert!(!fx.batches.join("batch_001").exists());
    assert!(fx.store.batches().names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_nothing_moved_from_nested_folders_leaves_no_batch_behind() {
    let fx = Fixture::new().await;
    for relative in ["2024/a.jpg", "2024/06/b.jpg"] {
        let gone = fx.unique_file(relative, 1).await;
        fs::remove_file(&gone).unwrap();
    }

    let result = fx
        .allocator(fx.settings(SelectionLimits::bytes(10)))
        .create_batch()
        .await
        .unwrap();

    assert!(!result.created);
    assert_eq!(result.reason.as_deref(), Some("No files could be moved into the batch"));
    assert_eq!(result.skipped.len(), 2);
    assert!(!fx.batches.join("batch_001").exists());

    // The name is free again for the next allocation.
    fx.unique_file("2024/c.jpg", 1).await;
    let retry = fx
        .allocator(fx.settings(SelectionLimits::bytes(10)))
        .create_batch()
        .await
        .unwrap();
    assert!(retry.created);
    assert_eq!(retry.batch_name.as_deref(), Some("batch_001"));
    assert!(fx.batches.join("batch_001/2024/c.jpg").exists());
}
