use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncthingError {
    /// Non-2xx answer; `message` is ready to show to an operator.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Unable to reach Syncthing: {0}")]
    Unreachable(String),

    #[error("Invalid Syncthing response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SyncthingError {
    /// Whether the daemon rejected our credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncthingError::Api { status: 401 | 403, .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncthingError>;
