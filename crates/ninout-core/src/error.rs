//! Executor and run errors.

use thiserror::Error;

use ninout_dag::{GraphError, Status};
use ninout_log::LogError;

/// Failure of a run as a whole. Per-step errors do not appear here; they
/// surface as that step's `failed` status.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("deadlock while executing the DAG")]
    Deadlock,

    #[error("invalid status transition for step `{step}`: {from} -> {to}")]
    InvalidTransition {
        step: String,
        from: Status,
        to: Status,
    },

    #[error("branch `{branch}` must resolve to a boolean before gating `{step}`")]
    BranchType { branch: String, step: String },

    #[error("steps failed: {}", names.join(", "))]
    RunFailed { names: Vec<String> },

    #[error("DAG contains a sql step but no SQL engine is available")]
    SqlEngineUnavailable,

    #[error(transparent)]
    Logger(#[from] LogError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
