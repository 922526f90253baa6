use core_library::LibraryError;
use core_metadata::MetadataError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<LibraryError> for IngestError {
    fn from(err: LibraryError) -> Self {
        IngestError::Database(err.to_string())
    }
}

impl From<MetadataError> for IngestError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Io(e) => IngestError::Io(e),
            other => IngestError::Config(other.to_string()),
        }
    }
}

impl From<core_runtime::Error> for IngestError {
    fn from(err: core_runtime::Error) -> Self {
        IngestError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
