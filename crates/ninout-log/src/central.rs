//! Central cross-run index: one shared `runs.sqlite` for all runs.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use ninout_dag::Step;

use crate::error::LogError;
use crate::logger::{RunLogger, StepUpdate, names_json, rows_for_result};

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Aggregates step rows and runtime across runs. Keys are composite
/// (`run_name`, `run_id`, `step_name`[, `row_id`]); output rows live in a
/// single `step_rows` table instead of per-step tables.
///
/// The connection runs in WAL mode with `synchronous=NORMAL` so the read
/// API can query while a run is writing. Writes are serialized by an
/// internal mutex on top of the executor's logger lock.
pub struct CentralStore {
    conn: Mutex<Option<Connection>>,
    run_name: String,
    run_id: String,
}

impl CentralStore {
    pub fn open(
        db_path: &Path,
        run_name: &str,
        dag_name: &str,
        steps: &[Step],
        disabled_edges: &BTreeSet<(String, String)>,
        disabled_steps: &BTreeSet<String>,
    ) -> Result<Self, LogError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        // Microseconds keep ids unique across runs sharing a second.
        let run_id = Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let created_at = timestamp();

        let tx = conn.transaction()?;
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_metadata (
                run_name TEXT,
                run_id TEXT,
                dag_name TEXT,
                created_at_utc TEXT,
                step_count INTEGER,
                PRIMARY KEY (run_name, run_id)
            );
            CREATE TABLE IF NOT EXISTS step_definition (
                run_name TEXT,
                run_id TEXT,
                step_name TEXT,
                deps_json TEXT,
                when_name TEXT,
                condition_bool INTEGER,
                is_branch INTEGER,
                code_text TEXT,
                disabled_deps_json TEXT,
                disabled_self INTEGER,
                PRIMARY KEY (run_name, run_id, step_name)
            );
            CREATE TABLE IF NOT EXISTS step_runtime (
                run_name TEXT,
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
                updated_at_utc TEXT,
                PRIMARY KEY (run_name, run_id, step_name)
            );
            CREATE TABLE IF NOT EXISTS step_rows (
                run_name TEXT,
                run_id TEXT,
                step_name TEXT,
                row_id INTEGER,
                payload_json TEXT,
                PRIMARY KEY (run_name, run_id, step_name, row_id)
            );",
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO run_metadata (
                run_name, run_id, dag_name, created_at_utc, step_count
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_name, run_id, dag_name, created_at, steps.len() as i64],
        )?;

        for step in steps {
            let disabled_deps: Vec<String> = disabled_edges
                .iter()
                .filter(|(_, target)| target == step.name())
                .map(|(source, _)| source.clone())
                .collect();
            tx.execute(
                "INSERT OR REPLACE INTO step_definition (
                    run_name, run_id, step_name, deps_json, when_name,
                    condition_bool, is_branch, code_text, disabled_deps_json, disabled_self
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run_name,
                    run_id,
                    step.name(),
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
                "INSERT OR REPLACE INTO step_runtime (
                    run_name, run_id, step_name, status, duration_ms,
                    input_lines, output_lines, throughput_in_lps, throughput_out_lps,
                    output_text, result_kind, updated_at_utc
                ) VALUES (?1, ?2, ?3, 'pending', NULL, NULL, NULL, NULL, NULL, '', 'none', ?4)",
                params![run_name, run_id, step.name(), created_at],
            )?;
        }
        tx.commit()?;

        tracing::debug!(path = %db_path.display(), %run_id, "opened central store");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            run_name: run_name.to_string(),
            run_id,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl RunLogger for CentralStore {
    fn log_step(&mut self, step_name: &str, update: &StepUpdate) -> Result<(), LogError> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(LogError::Closed)?;

        let tx = conn.transaction()?;
        if update.rewrites_rows() {
            tx.execute(
                "DELETE FROM step_rows WHERE run_name = ?1 AND run_id = ?2 AND step_name = ?3",
                params![self.run_name, self.run_id, step_name],
            )?;
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO step_rows (
                    run_name, run_id, step_name, row_id, payload_json
                ) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (row_id, payload_json) in rows_for_result(update.result.as_deref()) {
                insert.execute(params![
                    self.run_name,
                    self.run_id,
                    step_name,
                    row_id,
                    payload_json
                ])?;
            }
            drop(insert);
        }

        tx.execute(
            "INSERT OR REPLACE INTO step_runtime (
                run_name, run_id, step_name, status, duration_ms,
                input_lines, output_lines, throughput_in_lps, throughput_out_lps,
                output_text, result_kind, updated_at_utc
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                self.run_name,
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
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, err)| LogError::Sqlite(err))?;
        }
        Ok(())
    }
}
