//! Concurrent executor and run orchestration for ninout pipelines.
//!
//! [`Runner::run`] takes a validated [`Dag`], plans it, executes steps on a
//! worker pool while honoring dependencies, branch conditions and disable
//! rules, and streams every state transition into the run log.

pub mod capture;
mod error;
mod executor;
mod metrics;
mod report;
mod runner;
mod sql;

pub use error::ExecError;
pub use executor::{
    ExecOptions, ExecOutcome, Observer, PROGRESS_INTERVAL, ProgressEvent, ROW_QUEUE_CAPACITY,
    execute,
};
pub use report::{RunOutcome, StepReport};
pub use runner::{RunOptions, Runner};
pub use sql::{SqlEngine, default_engine};
#[cfg(feature = "sql")]
pub use sql::SqliteEngine;

// Re-export the graph surface for convenience.
pub use ninout_dag::{
    Dag, GraphError, Mode, Row, RowOutput, Status, Step, StepResults, StepValue, row,
};
