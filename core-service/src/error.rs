use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Ingest error: {0}")]
    Ingest(#[from] core_ingest::IngestError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Sort error: {0}")]
    Sort(#[from] core_sort::SortError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Sync daemon error: {0}")]
    Daemon(#[from] provider_syncthing::SyncthingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A pipeline run is active")]
    RunActive,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
