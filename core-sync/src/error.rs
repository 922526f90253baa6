use core_library::LibraryError;
use provider_syncthing::SyncthingError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unknown batch '{0}'")]
    BatchNotFound(String),

    #[error("Batch directory '{}' missing", .0.display())]
    BatchDirectoryMissing(PathBuf),

    #[error("{0}")]
    Daemon(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<SyncthingError> for SyncError {
    fn from(err: SyncthingError) -> Self {
        SyncError::Daemon(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
