//! Run-log errors.

use thiserror::Error;

/// Persistence failure. Any of these aborts the run that produced it.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json in run log: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown step in run log: `{0}`")]
    UnknownStep(String),

    #[error("run log is closed")]
    Closed,

    #[error("run store has no metadata row: {0}")]
    MissingMetadata(String),
}
