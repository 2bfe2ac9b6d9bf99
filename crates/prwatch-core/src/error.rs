//! Error types for prwatch-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("Task failed: {task}: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Merge blocked by branch policy: {0}")]
    MergePolicy(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transient failures are retried on the next poll iteration instead of
    /// being surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Platform(_) | Error::Io(_) | Error::Json(_))
    }
}
