//! The `RunLogger` capability and the per-update payload.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;

use ninout_dag::{Status, StepValue};

use crate::error::LogError;

/// Shape of a persisted step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    None,
    Scalar,
    List,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::None => "none",
            ResultKind::Scalar => "scalar",
            ResultKind::List => "list",
        }
    }

    pub fn of(result: Option<&StepValue>) -> Self {
        match result {
            None | Some(StepValue::Empty) => ResultKind::None,
            Some(StepValue::Rows(_)) => ResultKind::List,
            Some(_) => ResultKind::Scalar,
        }
    }
}

/// Snapshot of a step's runtime state, handed to every logger on each
/// progress tick and terminal transition.
#[derive(Debug, Clone)]
pub struct StepUpdate {
    pub status: Status,
    pub output: String,
    pub duration_ms: f64,
    pub result: Option<Arc<StepValue>>,
    pub input_lines: u64,
    pub output_lines: u64,
    pub throughput_in_lps: f64,
    pub throughput_out_lps: f64,
    pub disabled_deps: Vec<String>,
    pub disabled_self: bool,
}

impl StepUpdate {
    pub fn result_kind(&self) -> ResultKind {
        ResultKind::of(self.result.as_deref())
    }

    /// Whether this update carries final rows that must replace the step's
    /// stored output. Live `running` ticks only refresh the runtime row.
    pub fn rewrites_rows(&self) -> bool {
        matches!(self.status, Status::Done | Status::Failed) || self.result.is_some()
    }
}

/// A sink for run observations. Implementations must be safe to call from
/// the executor while worker threads are active; the executor serializes
/// calls across the registered logger list under one lock.
pub trait RunLogger: Send {
    fn log_step(&mut self, step_name: &str, update: &StepUpdate) -> Result<(), LogError>;
    fn close(&mut self) -> Result<(), LogError>;
}

static TABLE_SANITIZER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("valid pattern"));

/// Sanitized per-step table name: `step_` plus the lowercased alphanumeric
/// form of the step name. A leading digit gets an `s_` prefix; a name with
/// nothing left becomes `step_step`.
pub fn table_name_for_step(step_name: &str) -> String {
    let normalized = TABLE_SANITIZER.replace_all(step_name, "_");
    let normalized = normalized.trim_matches('_').to_lowercase();
    let normalized = if normalized.is_empty() {
        "step".to_string()
    } else if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        format!("s_{normalized}")
    } else {
        normalized
    };
    format!("step_{normalized}")
}

/// Dense 1-based rows for a result payload, each serialized to JSON.
pub fn rows_for_result(result: Option<&StepValue>) -> Vec<(i64, String)> {
    match result {
        None | Some(StepValue::Empty) => Vec::new(),
        Some(StepValue::Rows(rows)) => rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (idx as i64 + 1, json_text(row)))
            .collect(),
        Some(StepValue::Row(row)) => vec![(1, json_text(row))],
        Some(StepValue::Bool(value)) => vec![(1, value.to_string())],
    }
}

fn json_text<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// JSON text for a list of names (deps, disabled deps).
pub fn names_json(names: &[String]) -> String {
    json_text(&names)
}
