//! JSON response schemas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_name: String,
    pub run_id: String,
    pub dag_name: String,
    pub created_at_utc: String,
    pub step_count: i64,
    pub status_summary: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_name: String,
    pub table_name: String,
    pub status: String,
    pub duration_ms: Option<f64>,
    pub input_lines: Option<i64>,
    pub output_lines: Option<i64>,
    pub throughput_in_lps: Option<f64>,
    pub throughput_out_lps: Option<f64>,
    pub when_name: Option<String>,
    pub condition_bool: Option<bool>,
    pub is_branch: bool,
    pub disabled_self: bool,
    pub disabled_deps: Vec<String>,
    pub deps: Vec<String>,
    pub output_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetails {
    pub run_name: String,
    pub run_id: String,
    pub dag_name: String,
    pub created_at_utc: String,
    pub step_count: i64,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowEntry {
    pub row_id: i64,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRowsPage {
    pub run_name: String,
    pub step_name: String,
    pub total_rows: i64,
    pub offset: i64,
    pub limit: i64,
    pub rows: Vec<RowEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub step_name: String,
    pub status: String,
    pub deps: Vec<String>,
    pub is_branch: bool,
    pub when_name: Option<String>,
    pub condition_bool: Option<bool>,
    pub disabled_self: bool,
    pub disabled_deps: Vec<String>,
    /// Canvas position for the dashboard renderer.
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub is_conditional: bool,
    pub condition_bool: Option<bool>,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunGraph {
    pub run_name: String,
    pub run_id: String,
    pub dag_name: String,
    pub created_at_utc: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub width: u32,
    pub height: u32,
}
