use thiserror::Error;

use searchsync_core::SyncError;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid queue event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl WorkerError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn invalid_event<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidEvent(e.to_string())
    }
}
