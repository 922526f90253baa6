//! Workspace façade crate.
//!
//! Re-exports the pipeline service surface so host processes can depend on
//! `media-pipeline` alone and reach the service, workflow manager,
//! configuration, event and store types without wiring each crate
//! individually.

pub use core_library::{create_pool, DatabaseConfig, PipelineStore};
pub use core_runtime::config::PipelineConfig;
pub use core_runtime::events::{EventBus, PipelineEvent};
pub use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use core_service::*;
