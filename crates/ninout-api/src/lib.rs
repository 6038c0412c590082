//! Read-only HTTP API over the ninout run log.
//!
//! Serves run summaries, per-run step metrics, graph layouts and paged
//! step rows from the per-run store files under the logs directory. The
//! API never writes; the executor's log is the single writer.

mod error;
mod repository;
mod routes;
mod schemas;

pub use error::ApiError;
pub use repository::{get_run_details, get_run_graph, get_step_rows, list_runs};
pub use routes::{router, serve};
pub use schemas::{
    GraphEdge, GraphNode, RowEntry, RunDetails, RunGraph, RunSummary, StepRowsPage, StepSummary,
};
