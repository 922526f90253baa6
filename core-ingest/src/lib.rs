//! # Ingest Stages
//!
//! The first two pipeline stages: deduplicating the source tree and
//! grouping unique files into batches for the sync daemon.
//!
//! ## Overview
//!
//! - [`DedupEngine`] fingerprints new files and classifies them as
//!   `unique` or `duplicate`. The persisted status is its checkpoint.
//! - [`BatchAllocator`] moves (or copies) unique files into a fresh batch
//!   directory under a size or count budget, writes the manifest and
//!   records the batch as `pending`.
//!
//! Both stages are safe to re-run after a crash; neither keeps state that
//! the store does not already hold.

pub mod batch;
pub mod dedup;
pub mod error;
pub mod manifest;
pub mod selection;

pub use batch::{BatchAllocator, BatchCreationResult, BatchSettings, SkippedFile, NO_ELIGIBLE_FILES};
pub use dedup::{DedupEngine, DedupOutcome, DedupProgress, DedupSettings};
pub use error::{IngestError, Result};
pub use manifest::{BatchFileEntry, BatchManifest, MANIFEST_FILE_NAME};
pub use selection::{select_within_limits, Selection, SelectionLimits};
