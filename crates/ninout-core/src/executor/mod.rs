//! Concurrent step scheduler.
//!
//! Key behaviors:
//! - Steps are submitted to a bounded worker pool as soon as every
//!   dependency is `done` and no skip rule fires
//! - A `failed` or `skipped` dependency forces dependents to `skipped`
//! - A branch that finishes resolves its gated dependents: matching
//!   condition runs, the rest skip
//! - The scheduler thread blocks only on the first completed worker
//! - No progress with work still pending is a planner bug (`Deadlock`)

mod pool;
mod row_stream;
mod worker;

pub use row_stream::{PROGRESS_INTERVAL, ROW_QUEUE_CAPACITY};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ninout_dag::{ExecutionPlan, Mode, Status, Step, StepResults, StepValue};
use ninout_log::LogError;

use crate::error::ExecError;
use crate::executor::pool::{Completion, WorkerPool};
use crate::executor::worker::{JobContext, run_step_job};
use crate::metrics::text_line_count;
use crate::sql::SqlEngine;

/// Executor knobs. `max_workers` defaults to the logical core count.
pub struct ExecOptions {
    pub max_workers: Option<usize>,
    pub raise_on_fail: bool,
    pub progress_interval: Duration,
    pub row_queue_capacity: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            raise_on_fail: true,
            progress_interval: PROGRESS_INTERVAL,
            row_queue_capacity: ROW_QUEUE_CAPACITY,
        }
    }
}

/// One observation in the progress stream: a terminal transition, or a
/// `running` tick from a row-mode step.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub name: String,
    pub status: Status,
    pub result: Option<Arc<StepValue>>,
    pub output: String,
    pub duration_s: f64,
    pub input_lines: u64,
    pub output_lines: u64,
}

/// Progress sink. A returned error aborts the run; the run log depends on
/// every observation landing.
pub type Observer = Arc<dyn Fn(&ProgressEvent) -> Result<(), LogError> + Send + Sync>;

/// Everything a finished execution knows, keyed by step name.
#[derive(Debug, Default)]
pub struct ExecOutcome {
    pub results: StepResults,
    pub status: BTreeMap<String, Status>,
    pub outputs: BTreeMap<String, String>,
    pub timings_s: BTreeMap<String, f64>,
    pub input_lines: BTreeMap<String, u64>,
    pub output_lines: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, String>,
}

impl ExecOutcome {
    pub fn failed_steps(&self) -> Vec<String> {
        self.status
            .iter()
            .filter(|(_, status)| **status == Status::Failed)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Run the planned steps to completion.
pub fn execute(
    steps: &[Step],
    plan: &ExecutionPlan,
    options: &ExecOptions,
    observer: Option<Observer>,
    sql_engine: Option<Arc<dyn SqlEngine>>,
) -> Result<ExecOutcome, ExecError> {
    if steps.iter().any(|step| step.mode() == Mode::Sql) && sql_engine.is_none() {
        return Err(ExecError::SqlEngineUnavailable);
    }

    let by_name: HashMap<&str, &Step> = steps.iter().map(|step| (step.name(), step)).collect();
    let pool = WorkerPool::new(options.max_workers.unwrap_or_else(default_workers));
    let observer_failure: Arc<Mutex<Option<LogError>>> = Arc::new(Mutex::new(None));

    let mut pending: Vec<String> = plan.order.clone();
    let mut running: HashSet<String> = HashSet::new();
    let mut status: BTreeMap<String, Status> = plan
        .order
        .iter()
        .map(|name| (name.clone(), Status::Pending))
        .collect();
    let mut outcome = ExecOutcome::default();

    loop {
        if let Some(err) = observer_failure.lock().take() {
            return Err(ExecError::Logger(err));
        }
        if pending.is_empty() && running.is_empty() {
            break;
        }

        let mut progressed = false;
        let mut still_pending = Vec::with_capacity(pending.len());
        for name in std::mem::take(&mut pending) {
            let Some(step) = by_name.get(name.as_str()) else {
                // Plan entries must come from the same step set.
                return Err(ExecError::Deadlock);
            };
            if should_skip(step, plan, &status, &outcome.results)? {
                transition(&mut status, &name, Status::Skipped)?;
                outcome.outputs.insert(name.clone(), String::new());
                outcome.timings_s.insert(name.clone(), 0.0);
                outcome.input_lines.insert(name.clone(), 0);
                outcome.output_lines.insert(name.clone(), 0);
                notify(
                    &observer,
                    &ProgressEvent {
                        name: name.clone(),
                        status: Status::Skipped,
                        result: None,
                        output: String::new(),
                        duration_s: 0.0,
                        input_lines: 0,
                        output_lines: 0,
                    },
                )?;
                progressed = true;
            } else if can_run(step, &status, &outcome.results)? {
                submit(
                    &pool,
                    step,
                    &outcome.results,
                    options,
                    &observer,
                    &observer_failure,
                    sql_engine.clone(),
                );
                transition(&mut status, &name, Status::Running)?;
                running.insert(name);
                progressed = true;
            } else {
                still_pending.push(name);
            }
        }
        pending = still_pending;

        if !running.is_empty() {
            let Some(completion) = pool.recv() else {
                return Err(ExecError::Deadlock);
            };
            handle_completion(completion, &mut running, &mut status, &mut outcome, &observer)?;
            while let Some(extra) = pool.try_recv() {
                handle_completion(extra, &mut running, &mut status, &mut outcome, &observer)?;
            }
            progressed = true;
        }

        if !progressed && running.is_empty() && !pending.is_empty() {
            return Err(ExecError::Deadlock);
        }
    }

    if let Some(err) = observer_failure.lock().take() {
        return Err(ExecError::Logger(err));
    }

    outcome.status = status;
    let failed = outcome.failed_steps();
    if options.raise_on_fail && !failed.is_empty() {
        return Err(ExecError::RunFailed { names: failed });
    }
    Ok(outcome)
}

fn submit(
    pool: &WorkerPool,
    step: &Step,
    results: &StepResults,
    options: &ExecOptions,
    observer: &Option<Observer>,
    observer_failure: &Arc<Mutex<Option<LogError>>>,
    engine: Option<Arc<dyn SqlEngine>>,
) {
    let input_lines = step
        .deps()
        .iter()
        .filter_map(|dep| results.get(dep))
        .map(|value| value.line_count() as u64)
        .sum();
    let ctx = JobContext {
        step: step.clone(),
        inputs: results.clone(),
        input_lines,
        engine,
        observer: observer.clone(),
        observer_failure: observer_failure.clone(),
        row_queue_capacity: options.row_queue_capacity,
        progress_interval: options.progress_interval,
    };
    tracing::debug!(step = step.name(), mode = %step.mode(), "submitting step");
    pool.submit(Box::new(move || run_step_job(ctx)));
}

fn handle_completion(
    completion: Completion,
    running: &mut HashSet<String>,
    status: &mut BTreeMap<String, Status>,
    outcome: &mut ExecOutcome,
    observer: &Option<Observer>,
) -> Result<(), ExecError> {
    let Completion { name, outcome: done } = completion;
    if !running.remove(&name) {
        tracing::warn!(step = %name, "dropping completion for a step that is not running");
        return Ok(());
    }

    let mut output_lines = done.output_lines;
    if output_lines == 0 && !done.output.is_empty() {
        output_lines = text_line_count(&done.output);
    }
    outcome.outputs.insert(name.clone(), done.output.clone());
    outcome.timings_s.insert(name.clone(), done.duration_s);
    outcome.input_lines.insert(name.clone(), done.input_lines);
    outcome.output_lines.insert(name.clone(), output_lines);

    let (next, result) = match done.payload {
        Ok(value) => {
            let value = Arc::new(value);
            outcome.results.insert(&name, value.clone());
            (Status::Done, Some(value))
        }
        Err(error) => {
            tracing::error!(step = %name, %error, "step failed");
            outcome.errors.insert(name.clone(), error);
            (Status::Failed, None)
        }
    };
    transition(status, &name, next)?;
    notify(
        observer,
        &ProgressEvent {
            name,
            status: next,
            result,
            output: done.output,
            duration_s: done.duration_s,
            input_lines: done.input_lines,
            output_lines,
        },
    )
}

fn notify(observer: &Option<Observer>, event: &ProgressEvent) -> Result<(), ExecError> {
    if let Some(observer) = observer {
        observer(event)?;
    }
    Ok(())
}

/// The status transition table. Anything outside it is a programming error.
fn transition(
    status: &mut BTreeMap<String, Status>,
    name: &str,
    to: Status,
) -> Result<(), ExecError> {
    let from = status.get(name).copied().unwrap_or(Status::Pending);
    let valid = matches!(
        (from, to),
        (Status::Pending, Status::Running)
            | (Status::Pending, Status::Skipped)
            | (Status::Running, Status::Done)
            | (Status::Running, Status::Failed)
    );
    if !valid {
        return Err(ExecError::InvalidTransition {
            step: name.to_string(),
            from,
            to,
        });
    }
    tracing::debug!(step = name, %from, %to, "status transition");
    status.insert(name.to_string(), to);
    Ok(())
}

fn branch_value(branch: &str, step: &str, results: &StepResults) -> Result<bool, ExecError> {
    results
        .get(branch)
        .and_then(StepValue::as_bool)
        .ok_or_else(|| ExecError::BranchType {
            branch: branch.to_string(),
            step: step.to_string(),
        })
}

fn should_skip(
    step: &Step,
    plan: &ExecutionPlan,
    status: &BTreeMap<String, Status>,
    results: &StepResults,
) -> Result<bool, ExecError> {
    for dep in step.deps() {
        if matches!(
            status.get(dep.as_str()),
            Some(Status::Failed | Status::Skipped)
        ) {
            return Ok(true);
        }
    }
    if plan.is_step_disabled(step.name()) {
        return Ok(true);
    }
    if step
        .deps()
        .iter()
        .any(|dep| plan.is_edge_disabled(dep, step.name()))
    {
        return Ok(true);
    }
    if let Some(when) = step.when()
        && status.get(when) == Some(&Status::Done)
    {
        let value = branch_value(when, step.name(), results)?;
        if step.condition() != Some(value) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn can_run(
    step: &Step,
    status: &BTreeMap<String, Status>,
    results: &StepResults,
) -> Result<bool, ExecError> {
    for dep in step.deps() {
        if status.get(dep.as_str()) != Some(&Status::Done) {
            return Ok(false);
        }
    }
    if let Some(when) = step.when() {
        let value = branch_value(when, step.name(), results)?;
        return Ok(step.condition() == Some(value));
    }
    Ok(true)
}
