//! Durable run log for ninout pipelines.
//!
//! Two storage layers, both updated live while a run executes:
//! - **Per-run store**: one database file per run directory, with a table
//!   per step holding its output rows
//! - **Central store**: a shared `runs.sqlite` aggregating rows across runs
//!
//! Both implement the [`RunLogger`] capability; the executor composes them
//! and serializes every call under a single lock.

mod central;
mod error;
mod logger;
mod paths;
mod run_store;

pub use central::CentralStore;
pub use error::LogError;
pub use logger::{
    ResultKind, RunLogger, StepUpdate, names_json, rows_for_result, table_name_for_step,
};
pub use paths::{
    CENTRAL_DB_FILE, DEFAULT_LOGS_DIR, LOGS_DIR_ENV, RUN_DB_FILE, central_db_path, create_run_dir,
    resolve_logs_dir, run_db_path,
};
pub use run_store::{LoadedRun, LoadedStep, RunStore, load_run};
