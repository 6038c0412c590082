//! Queries against per-run store files.
//!
//! Runs are located by convention at `<logs_dir>/<run_name>/run.db`; the
//! directory basename is the run name used in URLs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{Connection, OpenFlags, params};

use ninout_dag::layout_positions;
use ninout_log::run_db_path;

use crate::error::ApiError;
use crate::schemas::{
    GraphEdge, GraphNode, RowEntry, RunDetails, RunGraph, RunSummary, StepRowsPage, StepSummary,
};

static SAFE_TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid pattern"));

fn connect(db_path: &Path) -> Result<Connection, ApiError> {
    Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(ApiError::from)
}

/// The persisted table name is interpolated into SQL, so it must pass a
/// strict identifier check even though the writer sanitized it already.
fn ensure_table_name(name: &str) -> Result<&str, ApiError> {
    if SAFE_TABLE_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(ApiError::BadRequest("invalid table name".to_string()))
    }
}

/// Latest run metadata recorded in a store file, if any.
fn latest_metadata(conn: &Connection) -> Result<Option<(String, String, String, i64)>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT run_id, dag_name, created_at_utc, step_count
         FROM run_metadata ORDER BY created_at_utc DESC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
        ))),
        None => Ok(None),
    }
}

/// Run summaries, newest first.
pub fn list_runs(logs_dir: &Path) -> Result<Vec<RunSummary>, ApiError> {
    if !logs_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut run_names: Vec<String> = std::fs::read_dir(logs_dir)
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    run_names.sort();
    run_names.reverse();

    let mut items = Vec::new();
    for run_name in run_names {
        let db_path = run_db_path(logs_dir, &run_name);
        if !db_path.is_file() {
            continue;
        }
        let conn = connect(&db_path)?;
        let Some((run_id, dag_name, created_at_utc, step_count)) = latest_metadata(&conn)? else {
            continue;
        };

        let mut stmt = conn.prepare(
            "SELECT status, count(*) FROM step_runtime WHERE run_id = ?1 GROUP BY status",
        )?;
        let summary_rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut status_summary = BTreeMap::new();
        for entry in summary_rows {
            let (status, count) = entry?;
            status_summary.insert(status, count);
        }

        items.push(RunSummary {
            run_name,
            run_id,
            dag_name,
            created_at_utc,
            step_count,
            status_summary,
        });
    }
    Ok(items)
}

/// Full run details with per-step runtime metrics.
pub fn get_run_details(logs_dir: &Path, run_name: &str) -> Result<RunDetails, ApiError> {
    let db_path = run_db_path(logs_dir, run_name);
    if !db_path.is_file() {
        return Err(ApiError::NotFound("Run not found".to_string()));
    }
    let conn = connect(&db_path)?;
    let Some((run_id, dag_name, created_at_utc, step_count)) = latest_metadata(&conn)? else {
        return Err(ApiError::NotFound("Run not found".to_string()));
    };

    let mut stmt = conn.prepare(
        "SELECT
            d.step_name, d.table_name, r.status, r.duration_ms, r.input_lines,
            r.output_lines, r.throughput_in_lps, r.throughput_out_lps,
            d.when_name, d.condition_bool, d.is_branch, d.disabled_self,
            d.disabled_deps_json, d.deps_json, r.output_text
         FROM step_definition d
         JOIN step_runtime r ON d.run_id = r.run_id AND d.step_name = r.step_name
         WHERE d.run_id = ?1
         ORDER BY d.step_name",
    )?;
    let step_rows = stmt.query_map(params![run_id], |row| {
        Ok((
            StepSummary {
                step_name: row.get(0)?,
                table_name: row.get(1)?,
                status: row.get(2)?,
                duration_ms: row.get(3)?,
                input_lines: row.get(4)?,
                output_lines: row.get(5)?,
                throughput_in_lps: row.get(6)?,
                throughput_out_lps: row.get(7)?,
                when_name: row.get::<_, Option<String>>(8)?.filter(|s| !s.is_empty()),
                condition_bool: row.get(9)?,
                is_branch: row.get(10)?,
                disabled_self: row.get(11)?,
                disabled_deps: Vec::new(),
                deps: Vec::new(),
                output_text: row.get::<_, Option<String>>(14)?.unwrap_or_default(),
            },
            row.get::<_, Option<String>>(12)?,
            row.get::<_, Option<String>>(13)?,
        ))
    })?;

    let mut steps = Vec::new();
    for entry in step_rows {
        let (mut step, disabled_json, deps_json) = entry?;
        step.disabled_deps = parse_names(disabled_json)?;
        step.deps = parse_names(deps_json)?;
        steps.push(step);
    }

    Ok(RunDetails {
        run_name: run_name.to_string(),
        run_id,
        dag_name,
        created_at_utc,
        step_count,
        steps,
    })
}

fn parse_names(json: Option<String>) -> Result<Vec<String>, ApiError> {
    match json {
        None => Ok(Vec::new()),
        Some(text) => {
            serde_json::from_str(&text).map_err(|err| ApiError::Internal(err.to_string()))
        }
    }
}

/// Paged output rows of one step.
pub fn get_step_rows(
    logs_dir: &Path,
    run_name: &str,
    step_name: &str,
    limit: i64,
    offset: i64,
) -> Result<StepRowsPage, ApiError> {
    let details = get_run_details(logs_dir, run_name)?;
    let step = details
        .steps
        .iter()
        .find(|step| step.step_name == step_name)
        .ok_or_else(|| ApiError::NotFound("Run or step not found".to_string()))?;

    let conn = connect(&run_db_path(logs_dir, run_name))?;
    let table_name = ensure_table_name(&step.table_name)?;
    let total_rows: i64 =
        conn.query_row(&format!("SELECT count(*) FROM {table_name}"), [], |row| {
            row.get(0)
        })?;
    let mut stmt = conn.prepare(&format!(
        "SELECT row_id, payload_json FROM {table_name} ORDER BY row_id LIMIT ?1 OFFSET ?2"
    ))?;
    let entries = stmt.query_map(params![limit, offset], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut rows = Vec::new();
    for entry in entries {
        let (row_id, payload_json) = entry?;
        let payload = serde_json::from_str(&payload_json)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        rows.push(RowEntry { row_id, payload });
    }

    Ok(StepRowsPage {
        run_name: run_name.to_string(),
        step_name: step_name.to_string(),
        total_rows,
        offset,
        limit,
        rows,
    })
}

/// Nodes and edges of a run, with canvas positions for the dashboard.
pub fn get_run_graph(logs_dir: &Path, run_name: &str) -> Result<RunGraph, ApiError> {
    let details = get_run_details(logs_dir, run_name)?;

    let node_deps: Vec<(String, Vec<String>)> = details
        .steps
        .iter()
        .map(|step| (step.step_name.clone(), step.deps.clone()))
        .collect();
    let layout =
        layout_positions(&node_deps).map_err(|err| ApiError::Internal(err.to_string()))?;

    let nodes = details
        .steps
        .iter()
        .map(|step| {
            let (x, y) = layout
                .positions
                .get(&step.step_name)
                .copied()
                .unwrap_or((0, 0));
            GraphNode {
                step_name: step.step_name.clone(),
                status: step.status.clone(),
                deps: step.deps.clone(),
                is_branch: step.is_branch,
                when_name: step.when_name.clone(),
                condition_bool: step.condition_bool,
                disabled_self: step.disabled_self,
                disabled_deps: step.disabled_deps.clone(),
                x,
                y,
            }
        })
        .collect();

    let mut edges = Vec::new();
    for step in &details.steps {
        for dep in &step.deps {
            let is_conditional = step.when_name.as_deref() == Some(dep.as_str());
            edges.push(GraphEdge {
                source: dep.clone(),
                target: step.step_name.clone(),
                is_conditional,
                condition_bool: if is_conditional {
                    step.condition_bool
                } else {
                    None
                },
                disabled: step.disabled_deps.contains(dep),
            });
        }
    }

    Ok(RunGraph {
        run_name: details.run_name,
        run_id: details.run_id,
        dag_name: details.dag_name,
        created_at_utc: details.created_at_utc,
        nodes,
        edges,
        width: layout.width,
        height: layout.height,
    })
}
