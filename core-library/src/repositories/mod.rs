//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations for the pipeline
//! store.
//!
//! ## Architecture
//!
//! - Traits define the interface for each table
//! - SQLite implementations use sqlx for async database access
//! - Multi-row state changes (batch creation, sync promotion, copy-mode
//!   sorting) run inside a single transaction
//!
//! ## Available Repositories
//!
//! - `FileRepository` - files and their dedup/batch/sort lifecycle
//! - `BatchRepository` - batches and the batch state machine
//! - `AuditRepository` - event log and configuration change history

pub mod audit;
pub mod batch;
pub mod file;

pub use audit::{AuditRepository, SqliteAuditRepository};
pub use batch::{BatchRepository, SqliteBatchRepository};
pub use file::{FileRepository, SqliteFileRepository};
