//! Filesystem layout of the run log.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Per-run store file inside each run directory.
pub const RUN_DB_FILE: &str = "run.db";

/// Central cross-run index at the root of the logs directory.
pub const CENTRAL_DB_FILE: &str = "runs.sqlite";

/// Default logs directory when neither flag nor environment override it.
pub const DEFAULT_LOGS_DIR: &str = "logs";

/// Environment variable overriding the logs directory for the read API.
pub const LOGS_DIR_ENV: &str = "NINOUT_LOGS_DIR";

pub fn run_db_path(logs_dir: &Path, run_name: &str) -> PathBuf {
    logs_dir.join(run_name).join(RUN_DB_FILE)
}

pub fn central_db_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(CENTRAL_DB_FILE)
}

/// Create `<logs_dir>/<dag_name>_<YYYYMMDD_HHMMSS>/` and return it together
/// with its basename, which doubles as the run name in the API.
pub fn create_run_dir(logs_dir: &Path, dag_name: &str) -> io::Result<(PathBuf, String)> {
    let run_name = format!("{dag_name}_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let run_dir = logs_dir.join(&run_name);
    std::fs::create_dir_all(&run_dir)?;
    Ok((run_dir, run_name))
}

/// Logs directory for the read API: explicit value, else `NINOUT_LOGS_DIR`,
/// else `logs`.
pub fn resolve_logs_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(LOGS_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOGS_DIR))
}
