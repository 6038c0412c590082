//! Graph model, validation and planning for ninout pipelines.
//!
//! Core concepts:
//! - **Step**: named unit of computation with declared dependencies and an
//!   execution mode (`task`, `row`, `sql`)
//! - **Branch**: boolean step gating conditional dependents
//! - **Dag**: container with registration and disable bookkeeping
//! - **ExecutionPlan**: validated topological order plus disable sets

mod dag;
mod error;
mod layout;
mod plan;
mod results;
mod step;
mod validate;

pub use dag::Dag;
pub use error::GraphError;
pub use layout::{Layout, layout_positions};
pub use plan::{ExecutionPlan, compile_execution_plan};
pub use results::StepResults;
pub use step::{
    Mode, Row, RowFn, RowOutput, SOURCE_UNAVAILABLE, SqlFn, Status, Step, StepFunc, StepValue,
    TaskFn, row,
};
pub use validate::{NodeDeps, levels, topological_order, validate_steps};
