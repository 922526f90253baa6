//! Aggregate counters for the dashboard view.

use crate::Result;
use chrono::{DateTime, Utc};
use core_library::{BatchStatus, PipelineStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub total_size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    /// Batches that reached `synced` or beyond
    pub synced: i64,
    pub sorted: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageSummary {
    pub batch_dir_bytes: u64,
    pub sorted_dir_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub generated_at: DateTime<Utc>,
    pub files: FileSummary,
    pub batches: BatchSummary,
    pub storage: StorageSummary,
}

pub struct DashboardService {
    store: PipelineStore,
    batch_dir: PathBuf,
    sorted_dir: PathBuf,
}

impl DashboardService {
    pub fn new(store: PipelineStore, batch_dir: impl Into<PathBuf>, sorted_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            batch_dir: batch_dir.into(),
            sorted_dir: sorted_dir.into(),
        }
    }

    /// Computed on every call.
    pub async fn summary(&self) -> Result<DashboardSummary> {
        let files = self.store.files();
        let totals = files.totals().await?;
        let file_counts = files.count_by_status().await?;
        let batch_counts = self.store.batches().count_by_status().await?;

        let count_of = |status: BatchStatus| batch_counts.get(status.as_str()).copied().unwrap_or(0);
        let synced = count_of(BatchStatus::Synced) + count_of(BatchStatus::Sorting) + count_of(BatchStatus::Sorted);
        let sorted = count_of(BatchStatus::Sorted);

        let batch_dir = self.batch_dir.clone();
        let sorted_dir = self.sorted_dir.clone();
        let storage = tokio::task::spawn_blocking(move || StorageSummary {
            batch_dir_bytes: directory_size(&batch_dir),
            sorted_dir_bytes: directory_size(&sorted_dir),
        })
        .await?;

        Ok(DashboardSummary {
            generated_at: Utc::now(),
            files: FileSummary {
                total: totals.total,
                by_status: file_counts,
                total_size_bytes: totals.total_size_bytes,
            },
            batches: BatchSummary {
                total: batch_counts.values().sum(),
                by_status: batch_counts,
                synced,
                sorted,
            },
            storage,
        })
    }
}

/// Sum of regular file sizes below `root`; zero when it does not exist.
fn directory_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_directory_size_is_recursive() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("a/b")).unwrap();
        fs::write(root.path().join("one.bin"), vec![0u8; 10]).unwrap();
        fs::write(root.path().join("a/b/two.bin"), vec![0u8; 32]).unwrap();

        assert_eq!(directory_size(root.path()), 42);
        assert_eq!(directory_size(&root.path().join("missing")), 0);
    }

    #[tokio::test]
    async fn test_summary_of_empty_store() {
        let store = PipelineStore::in_memory().await.unwrap();
        let root = TempDir::new().unwrap();
        let service = DashboardService::new(store, root.path().join("batches"), root.path().join("sorted"));

        let summary = service.summary().await.unwrap();

        assert_eq!(summary.files.total, 0);
        assert_eq!(summary.batches.total, 0);
        assert_eq!(summary.batches.synced, 0);
        assert_eq!(summary.storage.batch_dir_bytes, 0);
    }
}
