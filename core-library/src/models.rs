//! # Domain Models
//!
//! Rows of the pipeline store and the two status machines that drive them.
//!
//! ## Batch State Machine
//!
//! ```text
//! Pending → Syncing → Synced → Sorting → Sorted
//!    ↓         ↓        ↓         ↓
//!    └───────→ Error ───┘ (retry re-enters Syncing)
//! ```
//!
//! Statuses are persisted in lowercase and parsed case-insensitively so
//! rows written by older releases (`"SYNCED"`) still load.

use crate::error::{LibraryError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Timestamps
// ============================================================================

/// Renders a timestamp the way every table stores it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp. Unreadable values load as `None`.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .ok()
}

// ============================================================================
// File status
// ============================================================================

/// Lifecycle of a file row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Observed, not yet fingerprinted
    New,
    /// Canonical copy of its content
    Unique,
    /// Content already held by a canonical file
    Duplicate,
    /// Could not be processed; see `error`
    Error,
    /// Moved or copied into a batch
    Batched,
    /// Batch confirmed delivered by the sync daemon
    Synced,
    /// Placed in the sorted archive
    Sorted,
    /// Source copy left behind by a copy-mode transfer
    Archived,
}

impl FileStatus {
    pub const ALL: [FileStatus; 8] = [
        FileStatus::New,
        FileStatus::Unique,
        FileStatus::Duplicate,
        FileStatus::Error,
        FileStatus::Batched,
        FileStatus::Synced,
        FileStatus::Sorted,
        FileStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Unique => "unique",
            FileStatus::Duplicate => "duplicate",
            FileStatus::Error => "error",
            FileStatus::Batched => "batched",
            FileStatus::Synced => "synced",
            FileStatus::Sorted => "sorted",
            FileStatus::Archived => "archived",
        }
    }

    /// Whether a file in this status is the canonical holder of its content.
    pub fn is_canonical(&self) -> bool {
        matches!(
            self,
            FileStatus::Unique
                | FileStatus::Batched
                | FileStatus::Synced
                | FileStatus::Sorted
                | FileStatus::Archived
        )
    }

    /// Whether the dedup scan has already settled this file.
    pub fn is_settled(&self) -> bool {
        !matches!(self, FileStatus::New | FileStatus::Error)
    }
}

impl FromStr for FileStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        FileStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| LibraryError::InvalidStatus(s.to_string()))
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Batch status
// ============================================================================

/// Lifecycle of a batch row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Syncing,
    Synced,
    Sorting,
    Sorted,
    Error,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 6] = [
        BatchStatus::Pending,
        BatchStatus::Syncing,
        BatchStatus::Synced,
        BatchStatus::Sorting,
        BatchStatus::Sorted,
        BatchStatus::Error,
    ];

    /// Statuses that block the allocator from creating another batch.
    pub const BLOCKING: [BatchStatus; 5] = [
        BatchStatus::Pending,
        BatchStatus::Syncing,
        BatchStatus::Synced,
        BatchStatus::Sorting,
        BatchStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Syncing => "syncing",
            BatchStatus::Synced => "synced",
            BatchStatus::Sorting => "sorting",
            BatchStatus::Sorted => "sorted",
            BatchStatus::Error => "error",
        }
    }

    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Sorted)
    }

    /// Whether a batch in this status prevents a new allocation.
    pub fn is_blocking(&self) -> bool {
        Self::BLOCKING.contains(self)
    }

    /// Check whether `next` may follow this status.
    ///
    /// Re-entering the current status is always allowed so interrupted
    /// steps can be repeated.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Syncing, Synced)
                | (Synced, Sorting)
                | (Sorting, Sorted)
                | (Error, Syncing)
                | (Pending | Syncing | Synced | Sorting, Error)
        )
    }

    /// Validate a transition, producing a descriptive error when refused.
    pub fn validate_transition(&self, next: BatchStatus) -> Result<()> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        let reason = if self.is_terminal() {
            "batch is already sorted".to_string()
        } else {
            format!("{} cannot be followed by {}", self, next)
        };
        Err(LibraryError::InvalidStateTransition {
            from: self.to_string(),
            to: next.to_string(),
            reason,
        })
    }
}

impl FromStr for BatchStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        BatchStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| LibraryError::InvalidStatus(s.to_string()))
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A file known to the pipeline, keyed by its current absolute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size: Option<i64>,
    pub fingerprint: Option<String>,
    pub capture_ts: Option<DateTime<Utc>>,
    pub ctime: Option<f64>,
    pub mtime: Option<f64>,
    pub status: FileStatus,
    pub batch_id: Option<i64>,
    pub target_path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, FromRow)]
pub(crate) struct FileRow {
    path: String,
    size: Option<i64>,
    fingerprint: Option<String>,
    capture_ts: Option<String>,
    ctime: Option<f64>,
    mtime: Option<f64>,
    status: Option<String>,
    batch_id: Option<i64>,
    target_path: Option<String>,
    error: Option<String>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = LibraryError;

    fn try_from(row: FileRow) -> Result<Self> {
        let status = match row.status.as_deref() {
            Some(value) => value.parse()?,
            None => FileStatus::New,
        };

        Ok(Self {
            capture_ts: parse_timestamp(row.capture_ts.as_deref()),
            path: row.path,
            size: row.size,
            fingerprint: row.fingerprint,
            ctime: row.ctime,
            mtime: row.mtime,
            status,
            // Legacy rows used 0 for "no batch"
            batch_id: row.batch_id.filter(|id| *id > 0),
            target_path: row.target_path,
            error: row.error,
        })
    }
}

/// Stat information captured when the dedup scan observes a file.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedFile {
    pub path: String,
    pub size: i64,
    pub ctime: Option<f64>,
    pub mtime: Option<f64>,
}

/// A group of files handed to the sync daemon as one directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: i64,
    pub name: String,
    pub size_bytes: i64,
    pub file_count: i64,
    pub status: BatchStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sorted_at: Option<DateTime<Utc>>,
    pub manifest_path: Option<String>,
}

#[derive(Debug, FromRow)]
pub(crate) struct BatchRow {
    id: i64,
    name: String,
    size_bytes: Option<i64>,
    file_count: Option<i64>,
    status: Option<String>,
    created_at: Option<String>,
    synced_at: Option<String>,
    sorted_at: Option<String>,
    manifest_path: Option<String>,
}

impl TryFrom<BatchRow> for BatchRecord {
    type Error = LibraryError;

    fn try_from(row: BatchRow) -> Result<Self> {
        let status = match row.status.as_deref() {
            Some(value) => value.parse()?,
            None => BatchStatus::Pending,
        };

        Ok(Self {
            id: row.id,
            name: row.name,
            size_bytes: row.size_bytes.unwrap_or(0),
            file_count: row.file_count.unwrap_or(0),
            status,
            created_at: parse_timestamp(row.created_at.as_deref()),
            synced_at: parse_timestamp(row.synced_at.as_deref()),
            sorted_at: parse_timestamp(row.sorted_at.as_deref()),
            manifest_path: row.manifest_path,
        })
    }
}

/// Values for a batch row about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub manifest_path: Option<String>,
}

/// One file placed into a batch directory.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAssignment {
    /// Path the file had before the transfer
    pub source_path: String,
    /// Path inside the batch directory
    pub batch_path: String,
    pub size: i64,
}

/// Row of the `events` audit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub ts: String,
    pub module: String,
    pub level: String,
    pub message: String,
    pub context: Option<String>,
}

/// Row of the `config_changes` audit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ConfigChangeRecord {
    pub id: i64,
    pub ts: String,
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: Option<String>,
}

/// Aggregate size of the tracked files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTotals {
    pub total: i64,
    pub total_size_bytes: i64,
}

/// File counts for a single batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFileCounts {
    pub total: i64,
    pub sorted: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!("SYNCED".parse::<BatchStatus>().unwrap(), BatchStatus::Synced);
        assert_eq!(" Unique ".parse::<FileStatus>().unwrap(), FileStatus::Unique);
        assert!("bogus".parse::<BatchStatus>().is_err());
        assert_eq!(BatchStatus::Sorting.to_string(), "sorting");
    }

    #[test]
    fn test_allowed_transitions() {
        use BatchStatus::*;

        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Synced.can_transition_to(Sorting));
        assert!(Sorting.can_transition_to(Sorted));
        assert!(Error.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Error));
        assert!(Syncing.can_transition_to(Syncing));
    }

    #[test]
    fn test_refused_transitions() {
        use BatchStatus::*;

        assert!(!Pending.can_transition_to(Sorted));
        assert!(!Synced.can_transition_to(Syncing));
        assert!(!Sorted.can_transition_to(Error));
        assert!(!Error.can_transition_to(Sorting));

        match Sorted.validate_transition(Syncing) {
            Err(LibraryError::InvalidStateTransition { from, to, reason }) => {
                assert_eq!(from, "sorted");
                assert_eq!(to, "syncing");
                assert!(reason.contains("already sorted"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_canonical_statuses() {
        assert!(FileStatus::Unique.is_canonical());
        assert!(FileStatus::Archived.is_canonical());
        assert!(!FileStatus::Duplicate.is_canonical());
        assert!(!FileStatus::New.is_canonical());
        assert!(FileStatus::Duplicate.is_settled());
        assert!(!FileStatus::Error.is_settled());
    }

    #[test]
    fn test_timestamp_round_trip_and_legacy_formats() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp(Some(&format_timestamp(&ts))), Some(ts));
        assert_eq!(
            parse_timestamp(Some("2024-01-01T12:00:00+00:00")),
            Some(ts)
        );
        assert_eq!(parse_timestamp(Some("2024-01-01T12:00:00")), Some(ts));
        assert_eq!(parse_timestamp(Some("not a date")), None);
        assert_eq!(parse_timestamp(None), None);
    }

    #[test]
    fn test_batch_row_defaults() {
        let row = BatchRow {
            id: 1,
            name: "batch_001".to_string(),
            size_bytes: None,
            file_count: None,
            status: Some("PENDING".to_string()),
            created_at: Some("2024-01-01T00:00:00Z".to_string()),
            synced_at: None,
            sorted_at: None,
            manifest_path: None,
        };
        let record = BatchRecord::try_from(row).unwrap();
        assert_eq!(record.status, BatchStatus::Pending);
        assert_eq!(record.size_bytes, 0);
        assert!(record.created_at.is_some());
    }
}
