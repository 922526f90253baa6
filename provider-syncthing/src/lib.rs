//! # Syncthing Provider
//!
//! Client for the subset of the Syncthing REST API the pipeline needs.
//!
//! ## Overview
//!
//! - [`SyncDaemon`]: the calls the sync stage makes (rescan, completion,
//!   system and folder status)
//! - [`SyncthingClient`]: `SyncDaemon` over the REST API
//! - [`HttpTransport`]: request/response seam; [`ReqwestTransport`] is the
//!   production implementation with retry and backoff
//!
//! ## Usage
//!
//! ```ignore
//! use provider_syncthing::{RescanTarget, SyncDaemon, SyncthingClient};
//!
//! let client = SyncthingClient::from_config(&config.syncthing)?;
//! client
//!     .trigger_rescan(&RescanTarget::folder("photos", vec!["batch_001".into()]))
//!     .await?;
//! let completion = client.folder_completion("photos", None).await?;
//! ```

pub mod client;
pub mod error;
pub mod transport;

pub use client::{normalize_completion, FolderCompletion, RescanTarget, SyncDaemon, SyncthingClient};
pub use error::{Result, SyncthingError};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RetryPolicy,
};
