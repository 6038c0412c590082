//! Embedded engine contract for `sql`-mode steps.

use std::sync::Arc;

use ninout_dag::Row;

/// Process-wide embedded SQL engine. Dependency payloads are materialized
/// as tables before the query runs; the result comes back as one mapping
/// per output row with column names preserved.
pub trait SqlEngine: Send + Sync {
    fn query(&self, sql: &str, tables: &[(String, Vec<Row>)]) -> anyhow::Result<Vec<Row>>;
}

/// The engine compiled into this build, if any.
pub fn default_engine() -> Option<Arc<dyn SqlEngine>> {
    #[cfg(feature = "sql")]
    let engine: Option<Arc<dyn SqlEngine>> = Some(Arc::new(SqliteEngine::new()));
    #[cfg(not(feature = "sql"))]
    let engine: Option<Arc<dyn SqlEngine>> = None;
    engine
}

/// In-memory SQLite backend. Each query runs against a fresh connection
/// seeded with the dependency tables, so queries cannot observe each other.
#[cfg(feature = "sql")]
#[derive(Debug, Default)]
pub struct SqliteEngine;

#[cfg(feature = "sql")]
impl SqliteEngine {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "sql")]
impl SqlEngine for SqliteEngine {
    fn query(&self, sql: &str, tables: &[(String, Vec<Row>)]) -> anyhow::Result<Vec<Row>> {
        use anyhow::Context;

        let conn = rusqlite::Connection::open_in_memory().context("open in-memory engine")?;
        for (name, rows) in tables {
            materialize_table(&conn, name, rows)
                .with_context(|| format!("materialize table `{name}`"))?;
        }

        let mut stmt = conn.prepare(sql).context("prepare query")?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).context("run query")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                record.insert(column.clone(), value_to_json(row.get_ref(idx)?));
            }
            out.push(record);
        }
        Ok(out)
    }
}

#[cfg(feature = "sql")]
fn materialize_table(
    conn: &rusqlite::Connection,
    name: &str,
    rows: &[Row],
) -> anyhow::Result<()> {
    // Column set is the first-seen order of keys across all rows.
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key);
            }
        }
    }

    if columns.is_empty() {
        conn.execute_batch(&format!("CREATE TABLE \"{name}\" (value TEXT)"))?;
        return Ok(());
    }

    let column_list = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!("CREATE TABLE \"{name}\" ({column_list})"))?;

    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut insert = conn.prepare(&format!(
        "INSERT INTO \"{name}\" ({column_list}) VALUES ({placeholders})"
    ))?;
    for row in rows {
        let values: Vec<rusqlite::types::Value> = columns
            .iter()
            .map(|column| json_to_value(row.get(*column)))
            .collect();
        insert.execute(rusqlite::params_from_iter(values))?;
    }
    Ok(())
}

#[cfg(feature = "sql")]
fn json_to_value(value: Option<&serde_json::Value>) -> rusqlite::types::Value {
    use rusqlite::types::Value;

    match value {
        None | Some(serde_json::Value::Null) => Value::Null,
        Some(serde_json::Value::Bool(b)) => Value::Integer(i64::from(*b)),
        Some(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Some(serde_json::Value::String(s)) => Value::Text(s.clone()),
        Some(other) => Value::Text(other.to_string()),
    }
}

#[cfg(feature = "sql")]
fn value_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(text) => serde_json::Value::String(String::from_utf8_lossy(text).into()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

#[cfg(all(test, feature = "sql"))]
mod tests {
    use super::*;
    use ninout_dag::row;
    use serde_json::json;

    #[test]
    fn literal_query_needs_no_tables() {
        let engine = SqliteEngine::new();
        let rows = engine.query("SELECT 1 AS id", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
    }

    #[test]
    fn dependency_tables_are_queryable() {
        let engine = SqliteEngine::new();
        let tables = vec![(
            "step_orders".to_string(),
            vec![
                row([("id", json!(1)), ("amount", json!(10.5))]),
                row([("id", json!(2)), ("amount", json!(3.0))]),
            ],
        )];
        let rows = engine
            .query(
                "SELECT id, amount FROM step_orders WHERE amount > 5 ORDER BY id",
                &tables,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["amount"], json!(10.5));
    }

    #[test]
    fn empty_result_sets_are_fine() {
        let engine = SqliteEngine::new();
        let tables = vec![("step_empty".to_string(), vec![row([("v", json!(1))])])];
        let rows = engine
            .query("SELECT v FROM step_empty WHERE v > 100", &tables)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn invalid_sql_is_an_error() {
        let engine = SqliteEngine::new();
        assert!(engine.query("SELECT FROM nothing", &[]).is_err());
    }
}
