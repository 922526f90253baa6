//! Shared handle over the pool and the three repositories.

use crate::db::{create_pool, create_test_pool, DatabaseConfig};
use crate::repositories::{
    AuditRepository, BatchRepository, FileRepository, SqliteAuditRepository,
    SqliteBatchRepository, SqliteFileRepository,
};
use crate::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Cloneable entry point to the pipeline database.
///
/// Every stage holds a clone; all of them see the same pool.
#[derive(Clone)]
pub struct PipelineStore {
    pool: SqlitePool,
    files: Arc<dyn FileRepository>,
    batches: Arc<dyn BatchRepository>,
    audit: Arc<dyn AuditRepository>,
}

impl PipelineStore {
    /// Open (and upgrade, if needed) the database described by `config`.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        Ok(Self::from_pool(create_pool(config).await?))
    }

    /// Fresh in-memory store with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::from_pool(create_test_pool().await?))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            files: Arc::new(SqliteFileRepository::new(pool.clone())),
            batches: Arc::new(SqliteBatchRepository::new(pool.clone())),
            audit: Arc::new(SqliteAuditRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn files(&self) -> &dyn FileRepository {
        self.files.as_ref()
    }

    pub fn batches(&self) -> &dyn BatchRepository {
        self.batches.as_ref()
    }

    pub fn audit(&self) -> &dyn AuditRepository {
        self.audit.as_ref()
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for PipelineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStore")
            .field("connections", &self.pool.size())
            .finish()
    }
}
