//! # Media Metadata
//!
//! Per-file facts the pipeline derives from content.
//!
//! ## Overview
//!
//! - Content fingerprints for duplicate detection (`fingerprint`)
//! - Capture timestamps from EXIF with a modification-time fallback (`capture`)
//!
//! Every function here performs blocking I/O; async callers wrap them in
//! `tokio::task::spawn_blocking`.

pub mod capture;
pub mod error;
pub mod fingerprint;

pub use capture::{modified_time, read_capture_time, resolve_capture_time, CaptureSource};
pub use error::{MetadataError, Result};
pub use fingerprint::{ContentHasher, HashAlgorithm};
