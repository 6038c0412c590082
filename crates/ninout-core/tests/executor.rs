//! Executor integration tests: scheduling, branching, disabling, modes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use ninout_core::{
    ExecError, ExecOptions, Observer, ProgressEvent, capture, default_engine, execute,
};
use ninout_dag::{
    ExecutionPlan, RowOutput, Status, Step, StepValue, compile_execution_plan, row,
};

fn plan_for(steps: &[Step]) -> ExecutionPlan {
    compile_execution_plan(steps, &BTreeSet::new(), &BTreeSet::new()).unwrap()
}

fn plan_with(
    steps: &[Step],
    disabled_edges: &[(&str, &str)],
    disabled_steps: &[&str],
) -> ExecutionPlan {
    let edges = disabled_edges
        .iter()
        .map(|(s, t)| (s.to_string(), t.to_string()))
        .collect();
    let names = disabled_steps.iter().map(|s| s.to_string()).collect();
    compile_execution_plan(steps, &edges, &names).unwrap()
}

fn run_steps(steps: &[Step], raise_on_fail: bool) -> Result<ninout_core::ExecOutcome, ExecError> {
    let plan = plan_for(steps);
    let options = ExecOptions {
        raise_on_fail,
        ..ExecOptions::default()
    };
    execute(steps, &plan, &options, None, default_engine())
}

#[test]
fn empty_dag_runs_to_success() {
    let outcome = run_steps(&[], true).unwrap();
    assert!(outcome.status.is_empty());
    assert!(outcome.results.is_empty());
}

#[test]
fn linear_two_step_pipeline() {
    let steps = vec![
        Step::task("a", |_| {
            Ok(StepValue::Rows(vec![
                row([("v", json!("a"))]),
                row([("v", json!("b"))]),
                row([("v", json!("c"))]),
            ]))
        }),
        Step::task("b", |results| {
            let upper: Vec<_> = results
                .rows("a")
                .iter()
                .map(|r| row([("V", json!(r["v"].as_str().unwrap().to_uppercase()))]))
                .collect();
            Ok(StepValue::Rows(upper))
        })
        .with_deps(["a"]),
    ];

    let outcome = run_steps(&steps, true).unwrap();
    assert_eq!(outcome.status["a"], Status::Done);
    assert_eq!(outcome.status["b"], Status::Done);
    let rows = outcome.results.rows("b");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["V"], json!("A"));
    assert_eq!(rows[2]["V"], json!("C"));
    assert_eq!(outcome.input_lines["b"], 3);
    assert_eq!(outcome.output_lines["b"], 3);
}

#[test]
fn branch_false_skips_the_true_path() {
    let steps = vec![
        Step::task("start", |_| Ok(StepValue::Row(row([("v", json!("seed"))])))),
        Step::branch("decision", |_| Ok(false)).with_deps(["start"]),
        Step::task("on_true", |results| {
            Ok(StepValue::Row(results.rows("start")[0].clone()))
        })
        .with_deps(["start"])
        .with_when("decision", true),
        Step::task("on_false", |_| {
            Ok(StepValue::Row(row([("v", json!("fallback"))])))
        })
        .with_deps(["start"])
        .with_when("decision", false),
    ];

    let outcome = run_steps(&steps, true).unwrap();
    assert_eq!(outcome.status["on_true"], Status::Skipped);
    assert_eq!(outcome.status["on_false"], Status::Done);
    assert_eq!(outcome.results.rows("on_false")[0]["v"], json!("fallback"));
}

#[test]
fn failed_step_skips_dependents_without_raise() {
    let steps = vec![
        Step::task("boom", |_| anyhow::bail!("exploded")),
        Step::task("downstream", |_| Ok(StepValue::Empty)).with_deps(["boom"]),
    ];
    let outcome = run_steps(&steps, false).unwrap();
    assert_eq!(outcome.status["boom"], Status::Failed);
    assert_eq!(outcome.status["downstream"], Status::Skipped);
    assert!(outcome.errors["boom"].contains("exploded"));
}

#[test]
fn failed_step_raises_when_asked() {
    let steps = vec![
        Step::task("ok", |_| Ok(StepValue::Empty)),
        Step::task("boom", |_| anyhow::bail!("exploded")).with_deps(["ok"]),
    ];
    let err = run_steps(&steps, true).unwrap_err();
    let ExecError::RunFailed { names } = err else {
        panic!("expected RunFailed, got {err}");
    };
    assert_eq!(names, ["boom"]);
}

#[test]
fn panicking_step_fails_cleanly() {
    let steps = vec![
        Step::task("panics", |_| panic!("kaboom")),
        Step::task("after", |_| Ok(StepValue::Empty)).with_deps(["panics"]),
    ];
    let outcome = run_steps(&steps, false).unwrap();
    assert_eq!(outcome.status["panics"], Status::Failed);
    assert_eq!(outcome.status["after"], Status::Skipped);
    assert!(outcome.errors["panics"].contains("kaboom"));
}

#[test]
fn non_branch_step_may_not_return_bool() {
    let steps = vec![Step::task("bad", |_| Ok(StepValue::Bool(true)))];
    let outcome = run_steps(&steps, false).unwrap();
    assert_eq!(outcome.status["bad"], Status::Failed);
    assert!(outcome.errors["bad"].contains("boolean"));
}

#[test]
fn gating_on_a_non_boolean_step_aborts_the_run() {
    let steps = vec![
        Step::task("not_a_branch", |_| {
            Ok(StepValue::Row(row([("v", json!(1))])))
        }),
        Step::task("gated", |_| Ok(StepValue::Empty)).with_when("not_a_branch", true),
    ];
    let err = run_steps(&steps, true).unwrap_err();
    assert!(matches!(err, ExecError::BranchType { .. }), "got {err}");
}

#[test]
fn disabled_edge_skips_target_and_propagates() {
    let steps = vec![
        Step::task("a", |_| Ok(StepValue::Row(row([("v", json!("a"))])))),
        Step::task("b", |_| Ok(StepValue::Row(row([("v", json!("b"))])))).with_deps(["a"]),
        Step::task("c", |_| Ok(StepValue::Row(row([("v", json!("c"))])))).with_deps(["b"]),
    ];
    let plan = plan_with(&steps, &[("a", "b")], &[]);
    let options = ExecOptions {
        raise_on_fail: false,
        ..ExecOptions::default()
    };
    let outcome = execute(&steps, &plan, &options, None, None).unwrap();
    assert_eq!(outcome.status["a"], Status::Done);
    assert_eq!(outcome.status["b"], Status::Skipped);
    assert_eq!(outcome.status["c"], Status::Skipped);
}

#[test]
fn disabled_step_skips_itself_and_dependents() {
    let steps = vec![
        Step::task("a", |_| Ok(StepValue::Empty)),
        Step::task("b", |_| Ok(StepValue::Empty)).with_deps(["a"]),
        Step::task("c", |_| Ok(StepValue::Empty)).with_deps(["b"]),
    ];
    let plan = plan_with(&steps, &[], &["b"]);
    let options = ExecOptions {
        raise_on_fail: false,
        ..ExecOptions::default()
    };
    let outcome = execute(&steps, &plan, &options, None, None).unwrap();
    assert_eq!(outcome.status["a"], Status::Done);
    assert_eq!(outcome.status["b"], Status::Skipped);
    assert_eq!(outcome.status["c"], Status::Skipped);
}

#[test]
fn skip_invariant_holds_for_every_skipped_step() {
    let steps = vec![
        Step::task("root", |_| Ok(StepValue::Empty)),
        Step::branch("gate", |_| Ok(true)).with_deps(["root"]),
        Step::task("yes", |_| Ok(StepValue::Empty)).with_when("gate", true),
        Step::task("no", |_| Ok(StepValue::Empty)).with_when("gate", false),
        Step::task("off", |_| Ok(StepValue::Empty)).with_deps(["root"]),
        Step::task("after_off", |_| Ok(StepValue::Empty)).with_deps(["off"]),
    ];
    let plan = plan_with(&steps, &[], &["off"]);
    let options = ExecOptions {
        raise_on_fail: false,
        ..ExecOptions::default()
    };
    let outcome = execute(&steps, &plan, &options, None, None).unwrap();

    for (name, status) in &outcome.status {
        if *status != Status::Skipped {
            continue;
        }
        let step = steps.iter().find(|s| s.name() == name).unwrap();
        let justified = plan.is_step_disabled(name)
            || step.deps().iter().any(|d| plan.is_edge_disabled(d, name))
            || step.deps().iter().any(|d| {
                matches!(outcome.status[d], Status::Failed | Status::Skipped)
            })
            || step.when().is_some_and(|when| {
                outcome.results.bool_value(when) != step.condition()
            });
        assert!(justified, "unjustified skip of {name}");
    }
    assert_eq!(outcome.status["yes"], Status::Done);
    assert_eq!(outcome.status["no"], Status::Skipped);
    assert_eq!(outcome.status["after_off"], Status::Skipped);
}

#[test]
fn row_mode_filters_and_flattens() {
    let steps = vec![
        Step::task("extract", |_| {
            Ok(StepValue::Rows(
                (1..=3).map(|id| row([("id", json!(id))])).collect(),
            ))
        }),
        Step::row("per_row", |input| {
            if input["id"] == json!(2) {
                return Ok(RowOutput::Skip);
            }
            let mut out = input.clone();
            out.insert("ok".into(), json!(true));
            Ok(RowOutput::Emit(out))
        })
        .with_deps(["extract"]),
    ];

    let outcome = run_steps(&steps, true).unwrap();
    assert_eq!(outcome.status["per_row"], Status::Done);
    let rows = outcome.results.rows("per_row");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], row([("id", json!(1)), ("ok", json!(true))]));
    assert_eq!(rows[1], row([("id", json!(3)), ("ok", json!(true))]));
    assert_eq!(outcome.output_lines["per_row"], 2);
    assert_eq!(outcome.input_lines["per_row"], 3);
}

#[test]
fn row_mode_emits_running_progress_before_terminal() {
    let steps = vec![
        Step::task("extract", |_| {
            Ok(StepValue::Rows(
                (1..=60).map(|id| row([("id", json!(id))])).collect(),
            ))
        }),
        Step::row("slow", |input| {
            std::thread::sleep(Duration::from_millis(8));
            Ok(RowOutput::Emit(input.clone()))
        })
        .with_deps(["extract"]),
    ];

    let events: Arc<Mutex<Vec<(String, Status, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let observer: Observer = {
        let events = events.clone();
        Arc::new(move |event: &ProgressEvent| {
            events
                .lock()
                .push((event.name.clone(), event.status, event.output_lines));
            Ok(())
        })
    };

    let plan = plan_for(&steps);
    let options = ExecOptions {
        progress_interval: Duration::from_millis(50),
        ..ExecOptions::default()
    };
    let outcome = execute(&steps, &plan, &options, Some(observer), None).unwrap();
    assert_eq!(outcome.status["slow"], Status::Done);

    let events = events.lock();
    let running_at = events
        .iter()
        .position(|(name, status, _)| name == "slow" && *status == Status::Running)
        .expect("expected a running tick for the row step");
    let terminal_at = events
        .iter()
        .position(|(name, status, _)| name == "slow" && status.is_terminal())
        .expect("expected a terminal event for the row step");
    assert!(running_at < terminal_at);
}

#[test]
fn terminal_events_fire_exactly_once_per_step() {
    let steps = vec![
        Step::task("a", |_| Ok(StepValue::Empty)),
        Step::task("boom", |_| anyhow::bail!("nope")).with_deps(["a"]),
        Step::task("after", |_| Ok(StepValue::Empty)).with_deps(["boom"]),
    ];
    let events: Arc<Mutex<Vec<(String, Status)>>> = Arc::new(Mutex::new(Vec::new()));
    let observer: Observer = {
        let events = events.clone();
        Arc::new(move |event: &ProgressEvent| {
            if event.status.is_terminal() {
                events.lock().push((event.name.clone(), event.status));
            }
            Ok(())
        })
    };
    let plan = plan_for(&steps);
    let options = ExecOptions {
        raise_on_fail: false,
        ..ExecOptions::default()
    };
    execute(&steps, &plan, &options, Some(observer), None).unwrap();

    let events = events.lock();
    for name in ["a", "boom", "after"] {
        assert_eq!(
            events.iter().filter(|(n, _)| n == name).count(),
            1,
            "one terminal event for {name}"
        );
    }
}

#[test]
fn captured_output_feeds_line_count_fallback() {
    let steps = vec![Step::task("noisy", |_| {
        capture::emitln("line-1");
        capture::emitln("line-2");
        Ok(StepValue::Empty)
    })];
    let outcome = run_steps(&steps, true).unwrap();
    assert_eq!(outcome.status["noisy"], Status::Done);
    assert!(outcome.outputs["noisy"].contains("line-1"));
    assert_eq!(outcome.input_lines["noisy"], 0);
    // Two emitln calls leave a trailing newline: max(1, 2 + 1).
    assert_eq!(outcome.output_lines["noisy"], 3);
}

#[test]
fn helper_thread_output_is_not_captured() {
    let steps = vec![Step::task("io", |_| {
        std::thread::spawn(|| capture::emitln("outside-buffer"))
            .join()
            .ok();
        capture::emitln("inside-buffer");
        Ok(StepValue::Row(row([("v", json!("ok"))])))
    })];
    let outcome = run_steps(&steps, true).unwrap();
    assert!(outcome.outputs["io"].contains("inside-buffer"));
    assert!(!outcome.outputs["io"].contains("outside-buffer"));
}

#[cfg(feature = "sql")]
#[test]
fn sql_step_queries_dependency_tables() {
    let steps = vec![
        Step::task("orders", |_| {
            Ok(StepValue::Rows(vec![
                row([("id", json!(1)), ("amount", json!(10))]),
                row([("id", json!(2)), ("amount", json!(200))]),
            ]))
        }),
        Step::sql("big_orders", |_| {
            Ok("SELECT id FROM step_orders WHERE amount > 100 ORDER BY id".to_string())
        })
        .with_deps(["orders"]),
    ];
    let outcome = run_steps(&steps, true).unwrap();
    assert_eq!(outcome.status["big_orders"], Status::Done);
    let rows = outcome.results.rows("big_orders");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!(2));
}

#[cfg(feature = "sql")]
#[test]
fn sql_step_with_zero_rows_is_done() {
    let steps = vec![Step::sql("none", |_| {
        Ok("SELECT 1 AS id WHERE 1 = 0".to_string())
    })];
    let outcome = run_steps(&steps, true).unwrap();
    assert_eq!(outcome.status["none"], Status::Done);
    assert!(outcome.results.rows("none").is_empty());
    assert_eq!(outcome.output_lines["none"], 0);
}

#[test]
fn sql_step_without_engine_fails_at_submission() {
    let steps = vec![
        Step::task("never_runs", |_| unreachable!("must not be invoked")),
        Step::sql("query", |_| Ok("SELECT 1".to_string())),
    ];
    let plan = plan_for(&steps);
    let err = execute(&steps, &plan, &ExecOptions::default(), None, None).unwrap_err();
    assert!(matches!(err, ExecError::SqlEngineUnavailable));
}

#[test]
fn broken_plan_is_reported_as_deadlock() {
    // A plan that lost a dependency can never make progress; the executor
    // must refuse instead of spinning.
    let steps = vec![
        Step::task("a", |_| Ok(StepValue::Empty)),
        Step::task("b", |_| Ok(StepValue::Empty)).with_deps(["a"]),
    ];
    let plan = ExecutionPlan {
        order: vec!["b".to_string()],
        disabled_edges: BTreeSet::new(),
        disabled_steps: BTreeSet::new(),
    };
    let err = execute(&steps, &plan, &ExecOptions::default(), None, None).unwrap_err();
    assert!(matches!(err, ExecError::Deadlock));
}

#[test]
fn single_worker_still_completes_wide_graphs() {
    let steps: Vec<Step> = (0..6)
        .map(|i| Step::task(format!("s{i}"), |_| Ok(StepValue::Empty)))
        .collect();
    let plan = plan_for(&steps);
    let options = ExecOptions {
        max_workers: Some(1),
        ..ExecOptions::default()
    };
    let outcome = execute(&steps, &plan, &options, None, None).unwrap();
    assert!(outcome.status.values().all(|s| *s == Status::Done));
}
