//! Per-run store: one database file per run directory.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, params};

use ninout_dag::Step;

use crate::error::LogError;
use crate::logger::{RunLogger, StepUpdate, names_json, rows_for_result, table_name_for_step};

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Live store for a single run, created at run start with every step
/// `pending` and updated in place as the scheduler transitions them.
///
/// Holds `run_metadata`, `step_definition`, `step_runtime`, and one
/// `step_<name>` table per step for its output rows.
pub struct RunStore {
    conn: Option<Connection>,
    run_id: String,
    table_map: BTreeMap<String, String>,
}

impl RunStore {
    pub fn open(
        db_path: &Path,
        dag_name: &str,
        steps: &[Step],
        disabled_edges: &BTreeSet<(String, String)>,
        disabled_steps: &BTreeSet<String>,
    ) -> Result<Self, LogError> {
        let mut conn = Connection::open(db_path)?;
        let run_id = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let created_at = timestamp();

        let tx = conn.transaction()?;
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_metadata (
                run_id TEXT,
                dag_name TEXT,
                created_at_utc TEXT,
                step_count INTEGER
            );
            CREATE TABLE IF NOT EXISTS step_definition (
                run_id TEXT,
                step_name TEXT,
                table_name TEXT,
                deps_json TEXT,
                when_name TEXT,
                condition_bool INTEGER,
                is_branch INTEGER,
                code_text TEXT,
                disabled_deps_json TEXT,
                disabled_self INTEGER
            );
            CREATE TABLE IF NOT EXISTS step_runtime (
                run_id TEXT,
                step_name TEXT,
                status TEXT,
                duration_ms REAL,
                input_lines INTEGER,
                output_lines INTEGER,
                throughput_in_lps REAL,
                throughput_out_lps REAL,
                output_text TEXT,
                result_kind TEXT,
                updated_at_utc TEXT
            );",
        )?;
        tx.execute(
            "INSERT INTO run_metadata VALUES (?1, ?2, ?3, ?4)",
            params![run_id, dag_name, created_at, steps.len() as i64],
        )?;

        let mut table_map = BTreeMap::new();
        for step in steps {
            let table_name = table_name_for_step(step.name());
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (row_id INTEGER, payload_json TEXT)"
            ))?;
            let disabled_deps: Vec<String> = disabled_edges
                .iter()
                .filter(|(_, target)| target == step.name())
                .map(|(source, _)| source.clone())
                .collect();
            tx.execute(
                "INSERT INTO step_definition VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run_id,
                    step.name(),
                    table_name,
                    names_json(step.deps()),
                    step.when(),
                    step.condition(),
                    step.is_branch(),
                    step.source_text(),
                    names_json(&disabled_deps),
                    disabled_steps.contains(step.name()),
                ],
            )?;
            tx.execute(
                "INSERT INTO step_runtime (
                    run_id, step_name, status, duration_ms, input_lines, output_lines,
                    throughput_in_lps, throughput_out_lps, output_text, result_kind, updated_at_utc
                ) VALUES (?1, ?2, 'pending', NULL, NULL, NULL, NULL, NULL, '', 'none', ?3)",
                params![run_id, step.name(), created_at],
            )?;
            table_map.insert(step.name().to_string(), table_name);
        }
        tx.commit()?;

        tracing::debug!(path = %db_path.display(), %run_id, "opened per-run store");
        Ok(Self {
            conn: Some(conn),
            run_id,
            table_map,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn table_map(&self) -> &BTreeMap<String, String> {
        &self.table_map
    }
}

impl RunLogger for RunStore {
    fn log_step(&mut self, step_name: &str, update: &StepUpdate) -> Result<(), LogError> {
        let table_name = self
            .table_map
            .get(step_name)
            .ok_or_else(|| LogError::UnknownStep(step_name.to_string()))?
            .clone();
        let conn = self.conn.as_mut().ok_or(LogError::Closed)?;

        let tx = conn.transaction()?;
        if update.rewrites_rows() {
            tx.execute(&format!("DELETE FROM {table_name}"), [])?;
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {table_name} (row_id, payload_json) VALUES (?1, ?2)"
            ))?;
            for (row_id, payload_json) in rows_for_result(update.result.as_deref()) {
                insert.execute(params![row_id, payload_json])?;
            }
            drop(insert);
        }

        tx.execute(
            "DELETE FROM step_runtime WHERE run_id = ?1 AND step_name = ?2",
            params![self.run_id, step_name],
        )?;
        tx.execute(
            "INSERT INTO step_runtime (
                run_id, step_name, status, duration_ms, input_lines, output_lines,
                throughput_in_lps, throughput_out_lps, output_text, result_kind, updated_at_utc
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                self.run_id,
                step_name,
                update.status.as_str(),
                update.duration_ms,
                update.input_lines as i64,
                update.output_lines as i64,
                update.throughput_in_lps,
                update.throughput_out_lps,
                update.output,
                update.result_kind().as_str(),
                timestamp(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), LogError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| LogError::Sqlite(err))?;
        }
        Ok(())
    }
}

/// A step reconstructed from a per-run store.
#[derive(Debug, Clone)]
pub struct LoadedStep {
    pub step_name: String,
    pub table_name: String,
    pub deps: Vec<String>,
    pub when_name: Option<String>,
    pub condition_bool: Option<bool>,
    pub is_branch: bool,
    pub code_text: String,
    pub disabled_deps: Vec<String>,
    pub disabled_self: bool,
    pub status: String,
    pub duration_ms: Option<f64>,
    pub input_lines: Option<i64>,
    pub output_lines: Option<i64>,
    pub throughput_in_lps: Option<f64>,
    pub throughput_out_lps: Option<f64>,
    pub output_text: String,
    pub result_kind: String,
    pub rows: Vec<(i64, serde_json::Value)>,
}

/// A run reconstructed from a per-run store.
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub run_id: String,
    pub dag_name: String,
    pub created_at_utc: String,
    pub step_count: i64,
    pub steps: BTreeMap<String, LoadedStep>,
}

/// Reconstruct the latest run recorded in a per-run store file, including
/// every step's definition snapshot, runtime state and output rows.
pub fn load_run(db_path: &Path) -> Result<LoadedRun, LogError> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let (run_id, dag_name, created_at_utc, step_count) = conn
        .query_row(
            "SELECT run_id, dag_name, created_at_utc, step_count
             FROM run_metadata ORDER BY created_at_utc DESC LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .map_err(|_| LogError::MissingMetadata(db_path.display().to_string()))?;

    let mut stmt = conn.prepare(
        "SELECT
            d.step_name, d.table_name, d.deps_json, d.when_name, d.condition_bool,
            d.is_branch, d.code_text, d.disabled_deps_json, d.disabled_self,
            r.status, r.duration_ms, r.input_lines, r.output_lines,
            r.throughput_in_lps, r.throughput_out_lps, r.output_text, r.result_kind
         FROM step_definition d
         JOIN step_runtime r ON d.run_id = r.run_id AND d.step_name = r.step_name
         WHERE d.run_id = ?1",
    )?;
    let steps = stmt.query_map(params![run_id], |row| {
        let step = LoadedStep {
            step_name: row.get(0)?,
            table_name: row.get(1)?,
            deps: Vec::new(),
            when_name: row.get::<_, Option<String>>(3)?.filter(|s| !s.is_empty()),
            condition_bool: row.get(4)?,
            is_branch: row.get(5)?,
            code_text: row.get(6)?,
            disabled_deps: Vec::new(),
            disabled_self: row.get(8)?,
            status: row.get(9)?,
            duration_ms: row.get(10)?,
            input_lines: row.get(11)?,
            output_lines: row.get(12)?,
            throughput_in_lps: row.get(13)?,
            throughput_out_lps: row.get(14)?,
            output_text: row.get(15)?,
            result_kind: row.get(16)?,
            rows: Vec::new(),
        };
        Ok((step, row.get::<_, String>(2)?, row.get::<_, String>(7)?))
    })?;
    let mut loaded = BTreeMap::new();
    let mut collected = Vec::new();
    for entry in steps {
        collected.push(entry?);
    }
    drop(stmt);
    for (mut step, deps_json, disabled_json) in collected {
        step.deps = serde_json::from_str(&deps_json)?;
        step.disabled_deps = serde_json::from_str(&disabled_json)?;
        step.rows = load_step_rows(&conn, &step.table_name)?;
        loaded.insert(step.step_name.clone(), step);
    }

    Ok(LoadedRun {
        run_id,
        dag_name,
        created_at_utc,
        step_count,
        steps: loaded,
    })
}

fn load_step_rows(
    conn: &Connection,
    table_name: &str,
) -> Result<Vec<(i64, serde_json::Value)>, LogError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT row_id, payload_json FROM {table_name} ORDER BY row_id"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (row_id, payload_json) = row?;
        out.push((row_id, serde_json::from_str(&payload_json)?));
    }
    Ok(out)
}
