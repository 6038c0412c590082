//! Run orchestration: plan, open the run log, execute, close.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ninout_dag::{Dag, compile_execution_plan};
use ninout_log::{
    CentralStore, DEFAULT_LOGS_DIR, LogError, RUN_DB_FILE, RunLogger, RunStore, StepUpdate,
    central_db_path, create_run_dir,
};

use crate::error::ExecError;
use crate::executor::{
    ExecOptions, Observer, PROGRESS_INTERVAL, ProgressEvent, ROW_QUEUE_CAPACITY, execute,
};
use crate::metrics::{round3, throughput_lps};
use crate::report::{RunOutcome, StepReport};
use crate::sql::{SqlEngine, default_engine};

/// Options for a single run.
pub struct RunOptions {
    pub max_workers: Option<usize>,
    pub raise_on_fail: bool,
    /// Extra disabled edges, unioned with the DAG-level set.
    pub disabled_edges: Vec<(String, String)>,
    /// Extra disabled steps, unioned with the DAG-level set.
    pub disabled_steps: Vec<String>,
    pub dag_name: String,
    pub logs_dir: PathBuf,
    pub progress_interval: Duration,
    pub row_queue_capacity: usize,
    /// Engine for `sql`-mode steps; the built-in one when `None`.
    pub sql_engine: Option<Arc<dyn SqlEngine>>,
    /// Extra progress sink invoked after the run log, under the same lock.
    pub on_step_update: Option<Arc<dyn Fn(&ProgressEvent) + Send + Sync>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            raise_on_fail: true,
            disabled_edges: Vec::new(),
            disabled_steps: Vec::new(),
            dag_name: "dag".to_string(),
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
            progress_interval: PROGRESS_INTERVAL,
            row_queue_capacity: ROW_QUEUE_CAPACITY,
            sql_engine: None,
            on_step_update: None,
        }
    }
}

pub struct Runner;

impl Runner {
    /// Validate and plan `dag`, create its run directory and stores, then
    /// execute it while streaming every observation into the run log.
    ///
    /// Planning errors surface before any file is touched. Logger failures
    /// abort the run. With `raise_on_fail` set (the default), any failed
    /// step turns into [`ExecError::RunFailed`] after the log is closed.
    pub fn run(dag: &Dag, options: RunOptions) -> Result<RunOutcome, ExecError> {
        let mut disabled_edges: BTreeSet<(String, String)> = dag.disabled_edges().clone();
        disabled_edges.extend(options.disabled_edges.iter().cloned());
        let mut disabled_steps: BTreeSet<String> = dag.disabled_steps().clone();
        disabled_steps.extend(options.disabled_steps.iter().cloned());

        let plan = compile_execution_plan(dag.steps(), &disabled_edges, &disabled_steps)?;

        let (run_dir, run_name) = create_run_dir(&options.logs_dir, &options.dag_name)?;
        tracing::info!(run = %run_name, steps = dag.len(), "starting run");

        let run_store = RunStore::open(
            &run_dir.join(RUN_DB_FILE),
            &options.dag_name,
            dag.steps(),
            &disabled_edges,
            &disabled_steps,
        )?;
        let central = CentralStore::open(
            &central_db_path(&options.logs_dir),
            &run_name,
            &options.dag_name,
            dag.steps(),
            &disabled_edges,
            &disabled_steps,
        )?;
        let loggers: Arc<Mutex<Vec<Box<dyn RunLogger>>>> =
            Arc::new(Mutex::new(vec![Box::new(run_store), Box::new(central)]));

        let disabled_deps_map: BTreeMap<String, Vec<String>> = dag
            .steps()
            .iter()
            .map(|step| (step.name().to_string(), plan.disabled_deps_of(step.name())))
            .collect();

        let observer: Observer = {
            let loggers = loggers.clone();
            let disabled_steps = disabled_steps.clone();
            let user = options.on_step_update.clone();
            Arc::new(move |event: &ProgressEvent| -> Result<(), LogError> {
                let update = StepUpdate {
                    status: event.status,
                    output: event.output.clone(),
                    duration_ms: round3(event.duration_s * 1000.0),
                    result: event.result.clone(),
                    input_lines: event.input_lines,
                    output_lines: event.output_lines,
                    throughput_in_lps: round3(throughput_lps(event.input_lines, event.duration_s)),
                    throughput_out_lps: round3(throughput_lps(
                        event.output_lines,
                        event.duration_s,
                    )),
                    disabled_deps: disabled_deps_map
                        .get(&event.name)
                        .cloned()
                        .unwrap_or_default(),
                    disabled_self: disabled_steps.contains(&event.name),
                };
                let mut guard = loggers.lock();
                for logger in guard.iter_mut() {
                    logger.log_step(&event.name, &update)?;
                }
                drop(guard);
                if let Some(user) = &user {
                    user(event);
                }
                Ok(())
            })
        };

        let exec_options = ExecOptions {
            max_workers: options.max_workers,
            raise_on_fail: options.raise_on_fail,
            progress_interval: options.progress_interval,
            row_queue_capacity: options.row_queue_capacity,
        };
        let engine = options.sql_engine.clone().or_else(default_engine);
        let result = execute(dag.steps(), &plan, &exec_options, Some(observer), engine);

        // The log closes on both paths; an execution error wins over a
        // close error.
        let close_result = {
            let mut guard = loggers.lock();
            let mut first: Result<(), LogError> = Ok(());
            for logger in guard.iter_mut() {
                if let Err(err) = logger.close()
                    && first.is_ok()
                {
                    first = Err(err);
                }
            }
            first
        };
        let outcome = result?;
        close_result?;

        let mut reports = BTreeMap::new();
        for name in &plan.order {
            let duration_s = outcome.timings_s.get(name).copied().unwrap_or(0.0);
            let input_lines = outcome.input_lines.get(name).copied().unwrap_or(0);
            let output_lines = outcome.output_lines.get(name).copied().unwrap_or(0);
            reports.insert(
                name.clone(),
                StepReport {
                    status: outcome.status[name],
                    duration_ms: round3(duration_s * 1000.0),
                    input_lines,
                    output_lines,
                    throughput_in_lps: round3(throughput_lps(input_lines, duration_s)),
                    throughput_out_lps: round3(throughput_lps(output_lines, duration_s)),
                    output: outcome.outputs.get(name).cloned().unwrap_or_default(),
                    result: outcome.results.get(name).cloned(),
                    error: outcome.errors.get(name).cloned(),
                    disabled_deps: plan.disabled_deps_of(name),
                    disabled_self: disabled_steps.contains(name),
                },
            );
        }

        tracing::info!(run = %run_name, "run finished");
        Ok(RunOutcome {
            run_name,
            run_dir,
            results: outcome.results,
            status: outcome.status,
            reports,
        })
    }
}
