//! Step definitions for the pipeline DAG.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::results::StepResults;

/// A single output record: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Placeholder stored when no source text was supplied at registration.
pub const SOURCE_UNAVAILABLE: &str = "// source unavailable";

/// Runtime status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Done => "done",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Failed | Status::Skipped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution style of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One invocation; the return value is the whole payload.
    Task,
    /// Per-row streaming over the flattened dependency rows.
    Row,
    /// The function returns a query string executed against the embedded engine.
    Sql,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Task => "task",
            Mode::Row => "row",
            Mode::Sql => "sql",
        })
    }
}

/// Payload produced by a step function.
///
/// Branch steps produce `Bool`; every other step produces a row, a list of
/// rows, or nothing. Shapes outside this contract fail the step at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepValue {
    Bool(bool),
    Row(Row),
    Rows(Vec<Row>),
    Empty,
}

impl StepValue {
    /// Line count used as the throughput proxy: list length, mapping entry
    /// count, 1 for a boolean, 0 for an empty payload.
    pub fn line_count(&self) -> usize {
        match self {
            StepValue::Rows(rows) => rows.len(),
            StepValue::Row(row) => row.len(),
            StepValue::Bool(_) => 1,
            StepValue::Empty => 0,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StepValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// View the payload as a row slice: `Rows` as-is, a single `Row` as a
    /// one-element slice, anything else empty.
    pub fn as_rows(&self) -> &[Row] {
        match self {
            StepValue::Rows(rows) => rows.as_slice(),
            StepValue::Row(row) => std::slice::from_ref(row),
            _ => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StepValue::Empty)
    }
}

/// Per-row return value of a `row`-mode function.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutput {
    /// Emit a single output row.
    Emit(Row),
    /// Emit several output rows.
    EmitAll(Vec<Row>),
    /// Drop this input row.
    Skip,
}

pub type TaskFn = Arc<dyn Fn(&StepResults) -> anyhow::Result<StepValue> + Send + Sync>;
pub type RowFn = Arc<dyn Fn(&Row) -> anyhow::Result<RowOutput> + Send + Sync>;
pub type SqlFn = Arc<dyn Fn(&StepResults) -> anyhow::Result<String> + Send + Sync>;

/// The user-supplied computation, shaped by its execution mode.
#[derive(Clone)]
pub enum StepFunc {
    Task(TaskFn),
    Row(RowFn),
    Sql(SqlFn),
}

impl fmt::Debug for StepFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepFunc::Task(_) => "StepFunc::Task(..)",
            StepFunc::Row(_) => "StepFunc::Row(..)",
            StepFunc::Sql(_) => "StepFunc::Sql(..)",
        })
    }
}

/// A named unit of computation with declared dependencies.
///
/// Built through the typed constructors ([`Step::task`], [`Step::row`],
/// [`Step::sql`], [`Step::branch`]) and the `with_*` builder methods, then
/// registered with [`crate::Dag::add_step`].
#[derive(Debug, Clone)]
pub struct Step {
    name: String,
    func: StepFunc,
    deps: Vec<String>,
    when: Option<String>,
    condition: Option<bool>,
    is_branch: bool,
    source: Option<String>,
}

impl Step {
    fn new(name: impl Into<String>, func: StepFunc) -> Self {
        Self {
            name: name.into(),
            func,
            deps: Vec::new(),
            when: None,
            condition: None,
            is_branch: false,
            source: None,
        }
    }

    /// A step invoked once with the current results mapping.
    pub fn task<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepResults) -> anyhow::Result<StepValue> + Send + Sync + 'static,
    {
        Self::new(name, StepFunc::Task(Arc::new(func)))
    }

    /// A boolean step gating downstream conditional steps.
    pub fn branch<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepResults) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let mut step = Self::new(
            name,
            StepFunc::Task(Arc::new(move |results| {
                func(results).map(StepValue::Bool)
            })),
        );
        step.is_branch = true;
        step
    }

    /// A step invoked once per input row, with bounded streaming.
    pub fn row<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Row) -> anyhow::Result<RowOutput> + Send + Sync + 'static,
    {
        Self::new(name, StepFunc::Row(Arc::new(func)))
    }

    /// A step whose function returns a query for the embedded SQL engine.
    pub fn sql<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepResults) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self::new(name, StepFunc::Sql(Arc::new(func)))
    }

    /// Declare dependencies (builder pattern). Order is preserved.
    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Gate this step on a branch: it runs only when the branch result
    /// equals `condition`. The branch is added to the dependencies if the
    /// caller did not list it.
    pub fn with_when(mut self, branch: impl Into<String>, condition: bool) -> Self {
        let branch = branch.into();
        if !self.deps.contains(&branch) {
            self.deps.push(branch.clone());
        }
        self.when = Some(branch);
        self.condition = Some(condition);
        self
    }

    /// Attach the function's source text for the run log (best effort).
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func(&self) -> &StepFunc {
        &self.func
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub fn when(&self) -> Option<&str> {
        self.when.as_deref()
    }

    pub fn condition(&self) -> Option<bool> {
        self.condition
    }

    pub fn is_branch(&self) -> bool {
        self.is_branch
    }

    pub fn mode(&self) -> Mode {
        match self.func {
            StepFunc::Task(_) => Mode::Task,
            StepFunc::Row(_) => Mode::Row,
            StepFunc::Sql(_) => Mode::Sql,
        }
    }

    /// Source text recorded in the run log, or the sentinel when missing.
    pub fn source_text(&self) -> &str {
        self.source.as_deref().unwrap_or(SOURCE_UNAVAILABLE)
    }
}

/// Build a [`Row`] from string-keyed JSON values.
pub fn row<I, K>(entries: I) -> Row
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}
