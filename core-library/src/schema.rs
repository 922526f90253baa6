//! # Schema Upgrades
//!
//! In-place upgrades for databases written by earlier releases of the
//! pipeline. They run before the embedded migrations on every open; each
//! step inspects the live table layout and is a no-op once applied, so a
//! database that was copied around or partially upgraded still converges.
//!
//! `PRAGMA user_version` records the highest step that has been applied.
//!
//! | Version | Change |
//! |---------|--------|
//! | 1 | `batches` keyed by name is rebuilt with an integer surrogate id |
//! | 2 | `files.sha256`/`files.exif_datetime` renamed, statuses lowercased |
//! | 3 | `events` and `config_changes` gain an integer surrogate id |

use crate::Result;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

/// Highest schema upgrade this build knows about.
pub const SCHEMA_VERSION: i64 = 3;

const BATCHES_TABLE: &str = r#"
    CREATE TABLE batches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        size_bytes INTEGER,
        file_count INTEGER,
        status TEXT,
        created_at TEXT,
        synced_at TEXT,
        sorted_at TEXT,
        manifest_path TEXT
    )
"#;

const EVENTS_TABLE: &str = r#"
    CREATE TABLE events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        module TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        context TEXT
    )
"#;

const CONFIG_CHANGES_TABLE: &str = r#"
    CREATE TABLE config_changes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        key TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT,
        actor TEXT
    )
"#;

/// Bring a database of any earlier layout up to [`SCHEMA_VERSION`].
///
/// Returns the schema version after the upgrade.
pub async fn apply_schema_upgrades(pool: &SqlitePool) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let recorded: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *tx)
        .await?;

    let mut changed = false;
    changed |= rebuild_with_surrogate_id(
        &mut tx,
        "batches",
        BATCHES_TABLE,
        &[
            "name",
            "size_bytes",
            "file_count",
            "status",
            "created_at",
            "synced_at",
            "sorted_at",
            "manifest_path",
        ],
    )
    .await?;
    changed |= upgrade_legacy_files(&mut tx).await?;
    changed |= rebuild_with_surrogate_id(
        &mut tx,
        "events",
        EVENTS_TABLE,
        &["ts", "module", "level", "message", "context"],
    )
    .await?;
    changed |= rebuild_with_surrogate_id(
        &mut tx,
        "config_changes",
        CONFIG_CHANGES_TABLE,
        &["ts", "key", "old_value", "new_value", "actor"],
    )
    .await?;

    if recorded < SCHEMA_VERSION {
        // PRAGMA values cannot be bound
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    if changed {
        info!(
            from_version = recorded,
            to_version = SCHEMA_VERSION,
            "Upgraded legacy database schema"
        );
    } else {
        debug!(version = SCHEMA_VERSION, "Database schema is current");
    }

    Ok(recorded.max(SCHEMA_VERSION))
}

async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("name").map_err(Into::into))
        .collect()
}

/// Rebuilds `table` with an `id` surrogate key, preserving row order.
async fn rebuild_with_surrogate_id(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    create_statement: &str,
    columns: &[&str],
) -> Result<bool> {
    let existing = table_columns(tx, table).await?;
    if existing.is_empty() || existing.iter().any(|c| c == "id") {
        return Ok(false);
    }

    info!(table, "Rebuilding legacy table with surrogate id");

    let legacy = format!("{}_legacy", table);
    sqlx::query(&format!("ALTER TABLE {} RENAME TO {}", table, legacy))
        .execute(&mut **tx)
        .await?;
    sqlx::query(create_statement).execute(&mut **tx).await?;

    // Columns the legacy table never had are left NULL
    let carried: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| existing.iter().any(|e| e == c))
        .collect();
    let column_list = carried.join(", ");
    sqlx::query(&format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} FROM {legacy} ORDER BY rowid",
        table = table,
        cols = column_list,
        legacy = legacy
    ))
    .execute(&mut **tx)
    .await?;

    sqlx::query(&format!("DROP TABLE {}", legacy))
        .execute(&mut **tx)
        .await?;

    Ok(true)
}

async fn upgrade_legacy_files(tx: &mut Transaction<'_, Sqlite>) -> Result<bool> {
    let columns = table_columns(tx, "files").await?;
    if columns.is_empty() {
        return Ok(false);
    }

    let mut changed = false;
    for (old, new) in [("sha256", "fingerprint"), ("exif_datetime", "capture_ts")] {
        if columns.iter().any(|c| c == old) && !columns.iter().any(|c| c == new) {
            sqlx::query(&format!("ALTER TABLE files RENAME COLUMN {} TO {}", old, new))
                .execute(&mut **tx)
                .await?;
            changed = true;
        }
    }
    if changed {
        sqlx::query("DROP INDEX IF EXISTS idx_files_sha256")
            .execute(&mut **tx)
            .await?;
    }

    let files = sqlx::query("UPDATE files SET status = lower(status) WHERE status != lower(status)")
        .execute(&mut **tx)
        .await?;
    let batches = if table_columns(tx, "batches").await?.is_empty() {
        0
    } else {
        sqlx::query("UPDATE batches SET status = lower(status) WHERE status != lower(status)")
            .execute(&mut **tx)
            .await?
            .rows_affected()
    };

    Ok(changed || files.rows_affected() > 0 || batches > 0)
}
