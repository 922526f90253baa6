//! # Sort Stage
//!
//! Moves synced batch files into the `year/month/day` archive.

pub mod error;
pub mod resolver;

pub use error::{Result, SortError};
pub use resolver::{SortResolver, SortResult, SortSettings, SortStatus};
