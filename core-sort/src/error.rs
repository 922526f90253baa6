use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("Unknown batch '{0}'")]
    BatchNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<LibraryError> for SortError {
    fn from(err: LibraryError) -> Self {
        SortError::Database(err.to_string())
    }
}

impl From<core_runtime::Error> for SortError {
    fn from(err: core_runtime::Error) -> Self {
        SortError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SortError {
    fn from(err: tokio::task::JoinError) -> Self {
        SortError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SortError>;
