//! Worker-side step invocation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use parking_lot::Mutex;

use ninout_dag::{Row, SqlFn, Status, Step, StepFunc, StepResults, StepValue, TaskFn};
use ninout_log::{LogError, table_name_for_step};

use crate::capture;
use crate::executor::pool::{Completion, WorkerOutcome};
use crate::executor::row_stream::run_row_stream;
use crate::executor::{Observer, ProgressEvent};
use crate::sql::SqlEngine;

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let text = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("step panicked: {text}")
}

pub(crate) struct JobContext {
    pub step: Step,
    pub inputs: StepResults,
    pub input_lines: u64,
    pub engine: Option<Arc<dyn SqlEngine>>,
    pub observer: Option<Observer>,
    pub observer_failure: Arc<Mutex<Option<LogError>>>,
    pub row_queue_capacity: usize,
    pub progress_interval: Duration,
}

/// Run one step to completion on the current worker thread. Errors never
/// escape; they come back as the failed half of the outcome.
pub(crate) fn run_step_job(ctx: JobContext) -> Completion {
    let JobContext {
        step,
        inputs,
        input_lines,
        engine,
        observer,
        observer_failure,
        row_queue_capacity,
        progress_interval,
    } = ctx;

    let buffer = Arc::new(Mutex::new(String::new()));
    let guard = capture::register(buffer.clone());
    let start = Instant::now();

    let payload = match step.func() {
        StepFunc::Task(func) => invoke_task(func, &inputs, step.is_branch()),
        StepFunc::Sql(func) => invoke_sql(func, &inputs, engine.as_deref()),
        StepFunc::Row(func) => {
            let input_rows = collect_input_rows(&step, &inputs);
            let tick = {
                let name = step.name().to_string();
                let buffer = buffer.clone();
                let observer = observer.clone();
                let observer_failure = observer_failure.clone();
                move |count: u64| {
                    let Some(observer) = &observer else { return };
                    if observer_failure.lock().is_some() {
                        return;
                    }
                    let event = ProgressEvent {
                        name: name.clone(),
                        status: Status::Running,
                        result: None,
                        output: buffer.lock().clone(),
                        duration_s: start.elapsed().as_secs_f64(),
                        input_lines,
                        output_lines: count,
                    };
                    if let Err(err) = observer(&event) {
                        *observer_failure.lock() = Some(err);
                    }
                }
            };
            run_row_stream(
                func.clone(),
                input_rows,
                row_queue_capacity,
                progress_interval,
                buffer.clone(),
                tick,
            )
            .map(StepValue::Rows)
        }
    };

    let duration_s = start.elapsed().as_secs_f64();
    drop(guard);
    let output = buffer.lock().clone();

    let (payload, output_lines) = match payload {
        Ok(value) => {
            let lines = value.line_count() as u64;
            (Ok(value), lines)
        }
        Err(err) => (Err(format!("{err:#}")), 0),
    };

    Completion {
        name: step.name().to_string(),
        outcome: WorkerOutcome {
            payload,
            output,
            duration_s,
            input_lines,
            output_lines,
        },
    }
}

fn invoke_task(func: &TaskFn, inputs: &StepResults, is_branch: bool) -> anyhow::Result<StepValue> {
    let value =
        std::panic::catch_unwind(AssertUnwindSafe(|| func(inputs))).map_err(panic_message)??;
    match (&value, is_branch) {
        (StepValue::Bool(_), false) => {
            bail!("step must return a row, a list of rows, or nothing; got a boolean")
        }
        (StepValue::Bool(_), true) => Ok(value),
        (_, true) => bail!("branch step must return a boolean"),
        _ => Ok(value),
    }
}

fn invoke_sql(
    func: &SqlFn,
    inputs: &StepResults,
    engine: Option<&dyn SqlEngine>,
) -> anyhow::Result<StepValue> {
    let Some(engine) = engine else {
        bail!("no SQL engine configured");
    };
    let query =
        std::panic::catch_unwind(AssertUnwindSafe(|| func(inputs))).map_err(panic_message)??;
    let tables: Vec<(String, Vec<Row>)> = inputs
        .iter()
        .map(|(name, value)| (table_name_for_step(name), value.as_rows().to_vec()))
        .collect();
    let rows = engine.query(&query, &tables)?;
    Ok(StepValue::Rows(rows))
}

/// Flatten dependency payloads into the row-mode input stream, in declared
/// dependency order.
fn collect_input_rows(step: &Step, inputs: &StepResults) -> Vec<Row> {
    let mut rows = Vec::new();
    for dep in step.deps() {
        rows.extend(inputs.rows(dep).iter().cloned());
    }
    rows
}
