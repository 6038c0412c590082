//! Bundled example pipelines exercising every execution mode.

use std::time::Duration;

use serde_json::json;

use ninout_core::{Dag, RowOutput, Step, StepValue, capture, row};

/// Deterministic stand-in for random order data.
fn pseudo(seed: usize, modulo: usize) -> usize {
    (seed.wrapping_mul(2654435761) >> 7) % modulo
}

/// Extract -> branch -> conditional transform -> load.
pub fn branching() -> anyhow::Result<Dag> {
    let mut dag = Dag::new();
    dag.add_step(
        Step::task("extract", |_| {
            capture::emitln("extracting");
            Ok(StepValue::Row(row([("payload", json!("raw data"))])))
        })
        .with_source("|_| row {payload: \"raw data\"}"),
    )?;
    dag.add_step(
        Step::branch("needs_transform", |_| Ok(true))
            .with_deps(["extract"])
            .with_source("|_| true"),
    )?;
    dag.add_step(
        Step::task("transform", |results| {
            capture::emitln("transforming");
            let payload = results.rows("extract")[0]["payload"]
                .as_str()
                .unwrap_or_default()
                .to_uppercase();
            Ok(StepValue::Row(row([("payload", json!(payload))])))
        })
        .with_deps(["extract"])
        .with_when("needs_transform", true),
    )?;
    dag.add_step(
        Step::task("skip_transform", |_| {
            capture::emitln("skipping the transform");
            Ok(StepValue::Empty)
        })
        .with_deps(["extract"])
        .with_when("needs_transform", false),
    )?;
    dag.add_step(
        Step::task("load", |results| {
            let payload = &results.rows("transform")[0]["payload"];
            capture::emitln(&format!("loading payload: {payload}"));
            Ok(StepValue::Row(row([("loaded", json!(true))])))
        })
        .with_deps(["transform"]),
    )?;
    Ok(dag)
}

/// Three-step chain with the first hop disabled: extract runs, the rest
/// skip by propagation.
pub fn disabled_edge() -> anyhow::Result<Dag> {
    let mut dag = Dag::new();
    dag.add_step(Step::task("extract", |_| {
        capture::emitln("extract");
        Ok(StepValue::Row(row([("value", json!("raw-data"))])))
    }))?;
    dag.add_step(
        Step::task("transform", |results| {
            let value = results.rows("extract")[0]["value"]
                .as_str()
                .unwrap_or_default()
                .to_uppercase();
            Ok(StepValue::Row(row([("value", json!(value))])))
        })
        .with_deps(["extract"]),
    )?;
    dag.add_step(
        Step::task("load", |_| Ok(StepValue::Row(row([("status", json!("ok"))]))))
            .with_deps(["transform"]),
    )?;
    dag.disable_edge("extract", "transform")?;
    Ok(dag)
}

/// Streaming pipeline with per-row sleeps, slow enough that the dashboard
/// sees live `running` progress.
pub fn row_stream(total_rows: usize) -> anyhow::Result<Dag> {
    let mut dag = Dag::new();
    dag.add_step(Step::task("extract_orders", move |_| {
        let rows = (1..=total_rows)
            .map(|order_id| {
                row([
                    ("order_id", json!(order_id)),
                    ("customer_id", json!(1 + pseudo(order_id, 80))),
                    ("amount", json!(5.0 + pseudo(order_id, 49500) as f64 / 100.0)),
                    (
                        "status",
                        json!(["paid", "pending", "cancelled"][pseudo(order_id, 3)]),
                    ),
                ])
            })
            .collect();
        Ok(StepValue::Rows(rows))
    }))?;
    dag.add_step(
        Step::row("normalize_orders", |input| {
            std::thread::sleep(Duration::from_millis(8));
            let mut out = input.clone();
            let paid = out["status"] == json!("paid");
            out.insert("is_paid".into(), json!(paid));
            Ok(RowOutput::Emit(out))
        })
        .with_deps(["extract_orders"]),
    )?;
    dag.add_step(
        Step::row("keep_paid_orders", |input| {
            std::thread::sleep(Duration::from_millis(5));
            if input["is_paid"] == json!(true) {
                Ok(RowOutput::Emit(input.clone()))
            } else {
                Ok(RowOutput::Skip)
            }
        })
        .with_deps(["normalize_orders"]),
    )?;
    dag.add_step(
        Step::row("add_risk_score", |input| {
            std::thread::sleep(Duration::from_millis(3));
            let amount = input["amount"].as_f64().unwrap_or(0.0);
            let risk = (amount / 5.0).min(100.0);
            Ok(RowOutput::Emit(row([
                ("order_id", input["order_id"].clone()),
                ("customer_id", input["customer_id"].clone()),
                ("amount", json!(amount)),
                ("risk_score", json!((risk * 100.0).round() / 100.0)),
            ])))
        })
        .with_deps(["keep_paid_orders"]),
    )?;
    dag.add_step(
        Step::task("summarize", |results| {
            let rows = results.rows("add_risk_score");
            let total = rows.len();
            let avg = |key: &str| {
                if total == 0 {
                    0.0
                } else {
                    let sum: f64 = rows.iter().filter_map(|r| r[key].as_f64()).sum();
                    (sum / total as f64 * 100.0).round() / 100.0
                }
            };
            capture::emitln(&format!("processed {total} paid orders"));
            Ok(StepValue::Row(row([
                ("rows_processed", json!(total)),
                ("avg_amount", json!(avg("amount"))),
                ("avg_risk_score", json!(avg("risk_score"))),
            ])))
        })
        .with_deps(["add_risk_score"]),
    )?;
    Ok(dag)
}

/// Mixed modes: task extraction, row normalization, SQL aggregation, task
/// summary.
pub fn hybrid() -> anyhow::Result<Dag> {
    let mut dag = Dag::new();
    dag.add_step(Step::task("extract_orders", |_| {
        let rows = (1..=40)
            .map(|id| {
                row([
                    ("order_id", json!(id)),
                    ("customer_id", json!(1 + pseudo(id, 8))),
                    ("amount", json!(pseudo(id, 20000) as f64 / 100.0)),
                    ("status", json!(["paid", "pending"][pseudo(id, 2)])),
                ])
            })
            .collect();
        Ok(StepValue::Rows(rows))
    }))?;
    dag.add_step(
        Step::row("normalize", |input| {
            let mut out = input.clone();
            let paid = out["status"] == json!("paid");
            out.insert("is_paid".into(), json!(paid));
            Ok(RowOutput::Emit(out))
        })
        .with_deps(["extract_orders"]),
    )?;
    dag.add_step(
        Step::sql("paid_totals", |_| {
            Ok("SELECT customer_id, count(*) AS orders, sum(amount) AS total \
                FROM step_normalize WHERE is_paid = 1 \
                GROUP BY customer_id ORDER BY customer_id"
                .to_string())
        })
        .with_deps(["normalize"]),
    )?;
    dag.add_step(
        Step::task("summarize", |results| {
            let totals = results.rows("paid_totals");
            let grand: f64 = totals.iter().filter_map(|r| r["total"].as_f64()).sum();
            capture::emitln(&format!("{} paying customers", totals.len()));
            Ok(StepValue::Row(row([
                ("customers", json!(totals.len())),
                ("grand_total", json!((grand * 100.0).round() / 100.0)),
            ])))
        })
        .with_deps(["paid_totals"]),
    )?;
    Ok(dag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninout_core::{RunOptions, Runner, Status};

    fn run(dag: &Dag, name: &str, tmp: &tempfile::TempDir) -> ninout_core::RunOutcome {
        Runner::run(
            dag,
            RunOptions {
                dag_name: name.to_string(),
                logs_dir: tmp.path().to_path_buf(),
                ..RunOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn branching_demo_takes_the_true_path() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run(&branching().unwrap(), "branching", &tmp);
        assert_eq!(outcome.status["transform"], Status::Done);
        assert_eq!(outcome.status["skip_transform"], Status::Skipped);
        assert_eq!(outcome.status["load"], Status::Done);
        assert_eq!(
            outcome.results.rows("transform")[0]["payload"],
            serde_json::json!("RAW DATA")
        );
    }

    #[test]
    fn disabled_edge_demo_propagates_the_skip() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run(&disabled_edge().unwrap(), "disabled_edge", &tmp);
        assert_eq!(outcome.status["extract"], Status::Done);
        assert_eq!(outcome.status["transform"], Status::Skipped);
        assert_eq!(outcome.status["load"], Status::Skipped);
    }

    #[test]
    fn hybrid_demo_aggregates_paid_orders() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run(&hybrid().unwrap(), "hybrid", &tmp);
        assert_eq!(outcome.status["paid_totals"], Status::Done);
        assert_eq!(outcome.status["summarize"], Status::Done);
        let summary = &outcome.results.rows("summarize")[0];
        assert!(summary["customers"].as_u64().unwrap() <= 8);
    }

    #[test]
    fn row_stream_demo_keeps_only_paid_orders() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run(&row_stream(30).unwrap(), "row_stream", &tmp);
        assert_eq!(outcome.status["add_risk_score"], Status::Done);
        let scored = outcome.results.rows("add_risk_score").len();
        let normalized = outcome.results.rows("normalize_orders").len();
        assert_eq!(normalized, 30);
        assert!(scored <= normalized);
    }
}
