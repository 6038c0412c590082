//! Route handlers and router assembly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::repository;
use crate::schemas::{RunDetails, RunGraph, RunSummary, StepRowsPage};

#[derive(Clone)]
struct ApiState {
    logs_dir: Arc<PathBuf>,
}

/// Build the `/api` router over the given logs directory.
pub fn router(logs_dir: PathBuf) -> Router {
    let state = ApiState {
        logs_dir: Arc::new(logs_dir),
    };
    Router::new()
        .route("/api/runs", get(list_runs_endpoint))
        .route("/api/runs/{run_name}", get(run_details_endpoint))
        .route("/api/runs/{run_name}/graph", get(run_graph_endpoint))
        .route(
            "/api/runs/{run_name}/steps/{step_name}/rows",
            get(step_rows_endpoint),
        )
        .route("/api/health", get(health_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the read API until the process stops.
pub async fn serve(addr: SocketAddr, logs_dir: PathBuf) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, logs_dir = %logs_dir.display(), "read API listening");
    axum::serve(listener, router(logs_dir)).await?;
    Ok(())
}

/// Store queries are synchronous SQLite reads; keep them off the runtime.
async fn blocking<T, F>(task: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
}

async fn list_runs_endpoint(
    State(state): State<ApiState>,
) -> Result<Json<Vec<RunSummary>>, ApiError> {
    let logs_dir = state.logs_dir.clone();
    blocking(move || repository::list_runs(&logs_dir)).await.map(Json)
}

async fn run_details_endpoint(
    State(state): State<ApiState>,
    UrlPath(run_name): UrlPath<String>,
) -> Result<Json<RunDetails>, ApiError> {
    let logs_dir = state.logs_dir.clone();
    blocking(move || repository::get_run_details(&logs_dir, &run_name))
        .await
        .map(Json)
}

async fn run_graph_endpoint(
    State(state): State<ApiState>,
    UrlPath(run_name): UrlPath<String>,
) -> Result<Json<RunGraph>, ApiError> {
    let logs_dir = state.logs_dir.clone();
    blocking(move || repository::get_run_graph(&logs_dir, &run_name))
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct RowsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn step_rows_endpoint(
    State(state): State<ApiState>,
    UrlPath((run_name, step_name)): UrlPath<(String, String)>,
    Query(query): Query<RowsQuery>,
) -> Result<Json<StepRowsPage>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);
    let logs_dir = state.logs_dir.clone();
    blocking(move || repository::get_step_rows(&logs_dir, &run_name, &step_name, limit, offset))
        .await
        .map(Json)
}

async fn health_endpoint() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
