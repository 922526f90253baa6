//! # Pipeline Store
//!
//! Owns the SQLite database behind the media pipeline and the file
//! relocation helpers the stages share.
//!
//! ## Overview
//!
//! This crate manages:
//! - Connection pooling, legacy schema upgrades and migrations (`db`, `schema`)
//! - File and batch records with their status machines (`models`)
//! - Repository traits with SQLite implementations (`repositories`)
//! - Move/copy relocation with collision-free naming (`transfer`)

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod schema;
pub mod store;
pub mod transfer;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{
    BatchAssignment, BatchFileCounts, BatchRecord, BatchStatus, ConfigChangeRecord, EventRecord,
    FileRecord, FileStatus, FileTotals, NewBatch, ObservedFile,
};
pub use repositories::{AuditRepository, BatchRepository, FileRepository};
pub use store::PipelineStore;
