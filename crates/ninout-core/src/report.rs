//! Run reports: what `Runner::run` hands back to the caller.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use ninout_dag::{Status, StepResults, StepValue};

/// Final per-step record, mirroring what the run log persisted.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub status: Status,
    pub duration_ms: f64,
    pub input_lines: u64,
    pub output_lines: u64,
    pub throughput_in_lps: f64,
    pub throughput_out_lps: f64,
    pub output: String,
    pub result: Option<StepValue>,
    pub error: Option<String>,
    pub disabled_deps: Vec<String>,
    pub disabled_self: bool,
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Basename of the run directory; the API's URL key for this run.
    pub run_name: String,
    pub run_dir: PathBuf,
    pub results: StepResults,
    pub status: BTreeMap<String, Status>,
    pub reports: BTreeMap<String, StepReport>,
}
