//! Audit trail: pipeline events and configuration changes.

use crate::error::Result;
use crate::models::{format_timestamp, ConfigChangeRecord, EventRecord};
use async_trait::async_trait;
use chrono::Utc;
use core_runtime::config::ConfigChange;
use serde_json::Value;
use sqlx::SqlitePool;

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append an event. `context` is stored as JSON text.
    async fn record_event(
        &self,
        module: &str,
        level: &str,
        message: &str,
        context: Option<&Value>,
    ) -> Result<i64>;

    /// Most recent events, newest first.
    async fn recent_events(&self, limit: u32) -> Result<Vec<EventRecord>>;

    /// Append one row per changed key.
    async fn record_config_changes(&self, changes: &[ConfigChange], actor: &str) -> Result<usize>;

    /// Most recent configuration changes, newest first.
    async fn recent_config_changes(&self, limit: u32) -> Result<Vec<ConfigChangeRecord>>;
}

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn record_event(
        &self,
        module: &str,
        level: &str,
        message: &str,
        context: Option<&Value>,
    ) -> Result<i64> {
        let context = context.map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            "INSERT INTO events (ts, module, level, message, context) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(format_timestamp(&Utc::now()))
        .bind(module)
        .bind(level)
        .bind(message)
        .bind(context)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<EventRecord>> {
        let events = sqlx::query_as::<_, EventRecord>(
            "SELECT id, ts, module, level, message, context FROM events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn record_config_changes(&self, changes: &[ConfigChange], actor: &str) -> Result<usize> {
        if changes.is_empty() {
            return Ok(0);
        }

        let ts = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;
        for change in changes {
            sqlx::query(
                "INSERT INTO config_changes (ts, key, old_value, new_value, actor) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&ts)
            .bind(&change.key)
            .bind(&change.old_value)
            .bind(&change.new_value)
            .bind(actor)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(changes.len())
    }

    async fn recent_config_changes(&self, limit: u32) -> Result<Vec<ConfigChangeRecord>> {
        let changes = sqlx::query_as::<_, ConfigChangeRecord>(
            "SELECT id, ts, key, old_value, new_value, actor FROM config_changes ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_list_events() {
        let repo = SqliteAuditRepository::new(create_test_pool().await.unwrap());

        repo.record_event("dedup", "info", "scan started", None)
            .await
            .unwrap();
        repo.record_event("batch", "info", "batch created", Some(&json!({"batch": "batch_001"})))
            .await
            .unwrap();

        let events = repo.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].module, "batch");
        assert_eq!(events[0].context.as_deref(), Some(r#"{"batch":"batch_001"}"#));
        assert_eq!(events[1].context, None);

        assert_eq!(repo.recent_events(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_config_changes() {
        let repo = SqliteAuditRepository::new(create_test_pool().await.unwrap());
        let changes = vec![ConfigChange {
            key: "batch.max_files".to_string(),
            old_value: "0".to_string(),
            new_value: "10".to_string(),
        }];

        assert_eq!(repo.record_config_changes(&changes, "cli").await.unwrap(), 1);
        assert_eq!(repo.record_config_changes(&[], "cli").await.unwrap(), 0);

        let stored = repo.recent_config_changes(5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, "batch.max_files");
        assert_eq!(stored[0].new_value.as_deref(), Some("10"));
        assert_eq!(stored[0].actor.as_deref(), Some("cli"));
    }
}
