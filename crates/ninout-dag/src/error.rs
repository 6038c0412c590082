//! Graph construction and validation errors.

use thiserror::Error;

/// Structural or semantic failure detected before execution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("step `{step}` depends on `{dep}`, but no such step exists")]
    UnknownDependency { step: String, dep: String },

    #[error("step `{step}` is already registered")]
    DuplicateStep { step: String },

    #[error("cycle detected involving step `{step}`")]
    Cycle { step: String },

    #[error("unknown step disabled: `{step}`")]
    UnknownDisabledStep { step: String },

    #[error("unknown edge disabled: `{edge_source}` -> `{target}`")]
    UnknownDisabledEdge { edge_source: String, target: String },

    #[error("edge does not exist in the DAG: `{edge_source}` -> `{target}`")]
    EdgeNotInGraph { edge_source: String, target: String },
}
