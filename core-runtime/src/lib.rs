//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media pipeline:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//! - Naming and date patterns shared by the batch, sort and cleanup stages
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that every other pipeline crate
//! depends on. It establishes the logging conventions, the validated
//! configuration tree and the event broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod pattern;

pub use error::{Error, Result};
