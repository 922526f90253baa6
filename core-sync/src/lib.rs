//! # Sync Stage
//!
//! Hands batches to the external sync daemon and tracks them until they
//! are fully replicated.
//!
//! ## Components
//!
//! - **Sync Coordinator** (`coordinator`): start, status, refresh and the
//!   bounded wait loop used by pipeline runs
//! - **Status types** (`status`): start results, progress, diagnostics and
//!   trace snapshots

pub mod coordinator;
pub mod error;
pub mod status;

pub use coordinator::{SyncCoordinator, SyncSettings};
pub use error::{Result, SyncError};
pub use status::{
    DaemonSnapshot, PollPolicy, SyncDiagnostics, SyncStartResult, SyncStatus, SyncWaitOutcome,
};
