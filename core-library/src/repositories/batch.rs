//! Batch repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{format_timestamp, BatchAssignment, BatchRecord, BatchRow, BatchStatus, NewBatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_runtime::config::TransferMode;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::debug;

const BATCH_COLUMNS: &str =
    "id, name, size_bytes, file_count, status, created_at, synced_at, sorted_at, manifest_path";

/// Batch repository interface for data access operations
#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<BatchRecord>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<BatchRecord>>;

    /// Every batch name ever issued.
    async fn names(&self) -> Result<Vec<String>>;

    /// Oldest batch that prevents a new allocation, if any.
    async fn find_blocking(&self) -> Result<Option<BatchRecord>>;

    /// Batches in any of `statuses`, oldest first.
    async fn find_by_status(&self, statuses: &[BatchStatus]) -> Result<Vec<BatchRecord>>;

    /// Most recently created batches, newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<BatchRecord>>;

    /// Insert a `pending` batch and re-home its files in one transaction.
    ///
    /// In move mode each file row follows the file to its batch path. In copy
    /// mode a new `batched` row is created for the copy and the source row
    /// becomes `archived`.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Conflict`] when the name is already taken.
    async fn create_with_files(
        &self,
        batch: &NewBatch,
        files: &[BatchAssignment],
        mode: TransferMode,
    ) -> Result<BatchRecord>;

    /// Compare-and-set status change.
    ///
    /// Returns `Ok(false)` when the stored status no longer equals `from`.
    /// Entering `synced` or `sorted` stamps the matching timestamp with `at`;
    /// re-entering `syncing` or `sorting` clears it.
    async fn transition(
        &self,
        id: i64,
        from: BatchStatus,
        to: BatchStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark a batch synced and promote its `batched` files to `synced`.
    async fn mark_synced(&self, id: i64, from: BatchStatus, at: DateTime<Utc>) -> Result<bool>;

    /// Count batches per status.
    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>>;
}

/// SQLite implementation of BatchRepository
pub struct SqliteBatchRepository {
    pool: SqlitePool,
}

impl SqliteBatchRepository {
    /// Create a new SQLite batch repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn into_records(rows: Vec<BatchRow>) -> Result<Vec<BatchRecord>> {
    rows.into_iter().map(BatchRecord::try_from).collect()
}

fn status_placeholders(statuses: &[BatchStatus]) -> String {
    vec!["?"; statuses.len()].join(", ")
}

fn timestamp_clause(to: BatchStatus) -> &'static str {
    match to {
        BatchStatus::Syncing => ", synced_at = NULL",
        BatchStatus::Synced => ", synced_at = ?",
        BatchStatus::Sorting => ", sorted_at = NULL",
        BatchStatus::Sorted => ", sorted_at = ?",
        BatchStatus::Pending | BatchStatus::Error => "",
    }
}

fn map_unique_violation(err: sqlx::Error, name: &str) -> LibraryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            LibraryError::Conflict(format!("batch name '{}' already exists", name))
        }
        _ => LibraryError::Database(err),
    }
}

#[async_trait]
impl BatchRepository for SqliteBatchRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<BatchRecord>> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM batches WHERE id = ?",
            BATCH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BatchRecord::try_from).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<BatchRecord>> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM batches WHERE name = ?",
            BATCH_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BatchRecord::try_from).transpose()
    }

    async fn names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT name FROM batches ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn find_blocking(&self) -> Result<Option<BatchRecord>> {
        Ok(self
            .find_by_status(&BatchStatus::BLOCKING)
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_status(&self, statuses: &[BatchStatus]) -> Result<Vec<BatchRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM batches WHERE lower(status) IN ({}) ORDER BY datetime(created_at), id",
            BATCH_COLUMNS,
            status_placeholders(statuses)
        );
        let mut query = sqlx::query_as::<_, BatchRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        into_records(query.fetch_all(&self.pool).await?)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<BatchRecord>> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM batches ORDER BY datetime(created_at) DESC, id DESC LIMIT ?",
            BATCH_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn create_with_files(
        &self,
        batch: &NewBatch,
        files: &[BatchAssignment],
        mode: TransferMode,
    ) -> Result<BatchRecord> {
        let size_bytes: i64 = files.iter().map(|f| f.size).sum();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO batches (name, size_bytes, file_count, status, created_at, manifest_path)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&batch.name)
        .bind(size_bytes)
        .bind(files.len() as i64)
        .bind(format_timestamp(&batch.created_at))
        .bind(&batch.manifest_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, &batch.name))?;

        let batch_id = inserted.last_insert_rowid();

        for file in files {
            match mode {
                TransferMode::Move => {
                    sqlx::query(
                        r#"
                        UPDATE files SET
                            path = ?,
                            size = ?,
                            status = 'batched',
                            batch_id = ?,
                            target_path = NULL
                        WHERE path = ?
                        "#,
                    )
                    .bind(&file.batch_path)
                    .bind(file.size)
                    .bind(batch_id)
                    .bind(&file.source_path)
                    .execute(&mut *tx)
                    .await?;
                }
                TransferMode::Copy => {
                    sqlx::query(
                        r#"
                        INSERT INTO files (path, size, fingerprint, capture_ts, ctime, mtime, status, batch_id)
                        SELECT ?, ?, fingerprint, capture_ts, ctime, mtime, 'batched', ?
                        FROM files WHERE path = ?
                        "#,
                    )
                    .bind(&file.batch_path)
                    .bind(file.size)
                    .bind(batch_id)
                    .bind(&file.source_path)
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query(
                        "UPDATE files SET status = 'archived', target_path = ? WHERE path = ?",
                    )
                    .bind(&file.batch_path)
                    .bind(&file.source_path)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        debug!(batch_id, name = %batch.name, files = files.len(), "Batch row created");

        self.find_by_id(batch_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "batch".to_string(),
                id: batch_id.to_string(),
            })
    }

    async fn transition(
        &self,
        id: i64,
        from: BatchStatus,
        to: BatchStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        from.validate_transition(to)?;

        let sql = format!(
            "UPDATE batches SET status = ?{} WHERE id = ? AND lower(status) = ?",
            timestamp_clause(to)
        );
        let mut query = sqlx::query(&sql).bind(to.as_str());
        if matches!(to, BatchStatus::Synced | BatchStatus::Sorted) {
            query = query.bind(format_timestamp(&at));
        }
        let result = query
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_synced(&self, id: i64, from: BatchStatus, at: DateTime<Utc>) -> Result<bool> {
        from.validate_transition(BatchStatus::Synced)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE batches SET status = 'synced', synced_at = ? WHERE id = ? AND lower(status) = ?",
        )
        .bind(format_timestamp(&at))
        .bind(id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE files SET status = 'synced' WHERE batch_id = ? AND status IN ('batched', 'synced')",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(Option<String>, i64)> =
            sqlx::query_as("SELECT lower(status), COUNT(*) FROM batches GROUP BY lower(status)")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (status.unwrap_or_else(|| "unknown".to_string()), count))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{FileStatus, ObservedFile};
    use crate::repositories::{FileRepository, SqliteFileRepository};
    use chrono::{Duration, TimeZone};

    async fn setup() -> (SqliteBatchRepository, SqliteFileRepository) {
        let pool = create_test_pool().await.unwrap();
        (
            SqliteBatchRepository::new(pool.clone()),
            SqliteFileRepository::new(pool),
        )
    }

    async fn unique_file(files: &SqliteFileRepository, path: &str, size: i64) {
        files
            .upsert_observed(&ObservedFile {
                path: path.to_string(),
                size,
                ctime: None,
                mtime: None,
            })
            .await
            .unwrap();
        files.classify(path, path, FileStatus::Unique).await.unwrap();
    }

    fn new_batch(name: &str, created_at: DateTime<Utc>) -> NewBatch {
        NewBatch {
            name: name.to_string(),
            created_at,
            manifest_path: Some(format!("/batches/{}/manifest.json", name)),
        }
    }

    fn assignment(source: &str, batch_path: &str, size: i64) -> BatchAssignment {
        BatchAssignment {
            source_path: source.to_string(),
            batch_path: batch_path.to_string(),
            size,
        }
    }

    #[tokio::test]
    async fn test_create_with_files_move_mode() {
        let (batches, files) = setup().await;
        unique_file(&files, "/src/a.jpg", 3).await;
        unique_file(&files, "/src/b.jpg", 4).await;

        let batch = batches
            .create_with_files(
                &new_batch("batch_001", Utc::now()),
                &[
                    assignment("/src/a.jpg", "/batches/batch_001/a.jpg", 3),
                    assignment("/src/b.jpg", "/batches/batch_001/b.jpg", 4),
                ],
                TransferMode::Move,
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.file_count, 2);
        assert_eq!(batch.size_bytes, 7);

        assert!(files.find_by_path("/src/a.jpg").await.unwrap().is_none());
        let moved = files
            .find_by_path("/batches/batch_001/a.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, FileStatus::Batched);
        assert_eq!(moved.batch_id, Some(batch.id));
    }

    #[tokio::test]
    async fn test_create_with_files_copy_mode_archives_source() {
        let (batches, files) = setup().await;
        unique_file(&files, "/src/a.jpg", 3).await;

        let batch = batches
            .create_with_files(
                &new_batch("batch_001", Utc::now()),
                &[assignment("/src/a.jpg", "/batches/batch_001/a.jpg", 3)],
                TransferMode::Copy,
            )
            .await
            .unwrap();

        let source = files.find_by_path("/src/a.jpg").await.unwrap().unwrap();
        assert_eq!(source.status, FileStatus::Archived);
        assert_eq!(source.batch_id, None);

        let copy = files
            .find_by_path("/batches/batch_001/a.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(copy.status, FileStatus::Batched);
        assert_eq!(copy.batch_id, Some(batch.id));
        assert_eq!(copy.fingerprint, source.fingerprint);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let (batches, _) = setup().await;
        batches
            .create_with_files(&new_batch("batch_001", Utc::now()), &[], TransferMode::Move)
            .await
            .unwrap();

        let result = batches
            .create_with_files(&new_batch("batch_001", Utc::now()), &[], TransferMode::Move)
            .await;
        assert!(matches!(result, Err(LibraryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let (batches, _) = setup().await;
        let batch = batches
            .create_with_files(&new_batch("batch_001", Utc::now()), &[], TransferMode::Move)
            .await
            .unwrap();
        let now = Utc::now();

        assert!(batches
            .transition(batch.id, BatchStatus::Pending, BatchStatus::Syncing, now)
            .await
            .unwrap());
        // Stale expectation no longer matches
        assert!(!batches
            .transition(batch.id, BatchStatus::Pending, BatchStatus::Syncing, now)
            .await
            .unwrap());
        // Refused by the state machine before touching the row
        assert!(matches!(
            batches
                .transition(batch.id, BatchStatus::Syncing, BatchStatus::Sorted, now)
                .await,
            Err(LibraryError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_mark_synced_promotes_files() {
        let (batches, files) = setup().await;
        unique_file(&files, "/src/a.jpg", 3).await;
        let batch = batches
            .create_with_files(
                &new_batch("batch_001", Utc::now()),
                &[assignment("/src/a.jpg", "/batches/batch_001/a.jpg", 3)],
                TransferMode::Move,
            )
            .await
            .unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        batches
            .transition(batch.id, BatchStatus::Pending, BatchStatus::Syncing, at)
            .await
            .unwrap();

        assert!(batches
            .mark_synced(batch.id, BatchStatus::Syncing, at)
            .await
            .unwrap());

        let synced = batches.find_by_id(batch.id).await.unwrap().unwrap();
        assert_eq!(synced.status, BatchStatus::Synced);
        assert_eq!(synced.synced_at, Some(at));

        let file = files
            .find_by_path("/batches/batch_001/a.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.status, FileStatus::Synced);
    }

    #[tokio::test]
    async fn test_find_blocking_returns_oldest() {
        let (batches, _) = setup().await;
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = batches
            .create_with_files(
                &new_batch("batch_002", base + Duration::hours(1)),
                &[],
                TransferMode::Move,
            )
            .await
            .unwrap();
        let older = batches
            .create_with_files(&new_batch("batch_001", base), &[], TransferMode::Move)
            .await
            .unwrap();

        let blocking = batches.find_blocking().await.unwrap().unwrap();
        assert_eq!(blocking.id, older.id);

        let recent = batches.recent(10).await.unwrap();
        assert_eq!(recent.first().map(|b| b.id), Some(newer.id));
        assert_eq!(batches.names().await.unwrap().len(), 2);
    }
}
