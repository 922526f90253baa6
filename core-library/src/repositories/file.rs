//! File repository trait and implementation

use crate::error::Result;
use crate::models::{
    format_timestamp, BatchFileCounts, FileRecord, FileRow, FileStatus, FileTotals, ObservedFile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};

const FILE_COLUMNS: &str =
    "path, size, fingerprint, capture_ts, ctime, mtime, status, batch_id, target_path, error";

/// File repository interface for data access operations
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Find a file by its current path
    async fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>>;

    /// Status of every file the dedup scan must not revisit, keyed by path.
    async fn settled_statuses(&self) -> Result<HashMap<String, FileStatus>>;

    /// Record a freshly observed file as `new`, resetting any earlier
    /// fingerprint or error on the same path.
    async fn upsert_observed(&self, file: &ObservedFile) -> Result<()>;

    /// Store the fingerprint and dedup verdict of a file.
    async fn classify(&self, path: &str, fingerprint: &str, status: FileStatus) -> Result<()>;

    /// Set the status of a file, leaving everything else untouched.
    async fn set_status(&self, path: &str, status: FileStatus) -> Result<bool>;

    /// Mark a file as failed with a message.
    async fn mark_error(&self, path: &str, message: &str) -> Result<()>;

    /// Drop the row of a file still in `new`, for files that vanished
    /// before they could be classified.
    async fn discard_new(&self, path: &str) -> Result<bool>;

    /// Best existing holder of `fingerprint`, other than `exclude_path`.
    ///
    /// Non-duplicate rows win over duplicates; ties break on path.
    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
        exclude_path: &str,
    ) -> Result<Option<FileRecord>>;

    /// Unique files not yet assigned to a batch, ordered by path.
    async fn batch_candidates(&self) -> Result<Vec<FileRecord>>;

    /// Files of a batch restricted to `statuses`, ordered by path.
    async fn find_by_batch(&self, batch_id: i64, statuses: &[FileStatus])
        -> Result<Vec<FileRecord>>;

    /// Record that a batch file was moved into the sorted archive.
    async fn mark_sorted(
        &self,
        old_path: &str,
        new_path: &str,
        capture_ts: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Record a copy-mode sort: a new `sorted` row is created for the
    /// archive copy and the batch copy becomes `archived`.
    async fn record_sorted_copy(
        &self,
        original_path: &str,
        copy_path: &str,
        capture_ts: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Count files per status.
    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>>;

    /// Total number of rows and bytes tracked.
    async fn totals(&self) -> Result<FileTotals>;

    /// File counts for a batch.
    async fn batch_counts(&self, batch_id: i64) -> Result<BatchFileCounts>;
}

/// SQLite implementation of FileRepository
pub struct SqliteFileRepository {
    pool: SqlitePool,
}

impl SqliteFileRepository {
    /// Create a new SQLite file repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn into_records(rows: Vec<FileRow>) -> Result<Vec<FileRecord>> {
    rows.into_iter().map(FileRecord::try_from).collect()
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM files WHERE path = ?",
            FILE_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn settled_statuses(&self) -> Result<HashMap<String, FileStatus>> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT path, status FROM files WHERE status NOT IN ('new', 'error')")
                .fetch_all(&self.pool)
                .await?;

        let mut statuses = HashMap::with_capacity(rows.len());
        for (path, status) in rows {
            let Some(status) = status else { continue };
            let status: FileStatus = status.parse()?;
            if status.is_settled() {
                statuses.insert(path, status);
            }
        }
        Ok(statuses)
    }

    async fn upsert_observed(&self, file: &ObservedFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (path, size, ctime, mtime, status, fingerprint, error)
            VALUES (?, ?, ?, ?, 'new', NULL, NULL)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                ctime = excluded.ctime,
                mtime = excluded.mtime,
                status = 'new',
                fingerprint = NULL,
                error = NULL
            "#,
        )
        .bind(&file.path)
        .bind(file.size)
        .bind(file.ctime)
        .bind(file.mtime)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn classify(&self, path: &str, fingerprint: &str, status: FileStatus) -> Result<()> {
        sqlx::query("UPDATE files SET fingerprint = ?, status = ?, error = NULL WHERE path = ?")
            .bind(fingerprint)
            .bind(status.as_str())
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_status(&self, path: &str, status: FileStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE files SET status = ? WHERE path = ?")
            .bind(status.as_str())
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_error(&self, path: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE files SET status = 'error', error = ? WHERE path = ?")
            .bind(message)
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn discard_new(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE path = ? AND status = 'new'")
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
        exclude_path: &str,
    ) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            SELECT {} FROM files
            WHERE fingerprint = ? AND path != ? AND status NOT IN ('new', 'error')
            ORDER BY CASE WHEN status = 'duplicate' THEN 1 ELSE 0 END, path
            LIMIT 1
            "#,
            FILE_COLUMNS
        ))
        .bind(fingerprint)
        .bind(exclude_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn batch_candidates(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            SELECT {} FROM files
            WHERE status = 'unique' AND (batch_id IS NULL OR batch_id = 0)
            ORDER BY path
            "#,
            FILE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn find_by_batch(
        &self,
        batch_id: i64,
        statuses: &[FileStatus],
    ) -> Result<Vec<FileRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM files WHERE batch_id = ? AND status IN ({}) ORDER BY path",
            FILE_COLUMNS, placeholders
        );
        let mut query = sqlx::query_as::<_, FileRow>(&sql).bind(batch_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        into_records(rows)
    }

    async fn mark_sorted(
        &self,
        old_path: &str,
        new_path: &str,
        capture_ts: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE files SET
                path = ?,
                target_path = ?,
                status = 'sorted',
                capture_ts = COALESCE(capture_ts, ?),
                error = NULL
            WHERE path = ?
            "#,
        )
        .bind(new_path)
        .bind(new_path)
        .bind(capture_ts.as_ref().map(format_timestamp))
        .bind(old_path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_sorted_copy(
        &self,
        original_path: &str,
        copy_path: &str,
        capture_ts: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let capture_ts = capture_ts.as_ref().map(format_timestamp);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (path, size, fingerprint, capture_ts, ctime, mtime, status, batch_id, target_path)
            SELECT ?, size, fingerprint, COALESCE(capture_ts, ?), ctime, mtime, 'sorted', batch_id, ?
            FROM files WHERE path = ?
            "#,
        )
        .bind(copy_path)
        .bind(&capture_ts)
        .bind(copy_path)
        .bind(original_path)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE files SET
                status = 'archived',
                target_path = ?,
                capture_ts = COALESCE(capture_ts, ?)
            WHERE path = ?
            "#,
        )
        .bind(copy_path)
        .bind(&capture_ts)
        .bind(original_path)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(Option<String>, i64)> =
            sqlx::query_as("SELECT lower(status), COUNT(*) FROM files GROUP BY lower(status)")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (status.unwrap_or_else(|| "unknown".to_string()), count))
            .collect())
    }

    async fn totals(&self) -> Result<FileTotals> {
        let (total, total_size_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files")
                .fetch_one(&self.pool)
                .await?;

        Ok(FileTotals {
            total,
            total_size_bytes,
        })
    }

    async fn batch_counts(&self, batch_id: i64) -> Result<BatchFileCounts> {
        let (total, sorted): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'sorted' THEN 1 ELSE 0 END), 0)
            FROM files
            WHERE batch_id = ? AND status != 'archived'
            "#,
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(BatchFileCounts { total, sorted })
    }
}
