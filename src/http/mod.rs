//! Optional HTTP surface (spec §6): a thin JSON mirror of the tool-protocol
//! operations for callers that prefer a REST endpoint over the MCP
//! transport. Disabled by default; enabled via `server.http_enabled`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::Orchestrator;
use crate::semantic::planner::PlanRequest;
use crate::utils::AppError;

#[derive(Clone)]
struct HttpState {
    orchestrator: Arc<Orchestrator>,
    started_at: Instant,
}

pub async fn serve(orchestrator: Arc<Orchestrator>, addr: &str) -> anyhow::Result<()> {
    let state = HttpState { orchestrator, started_at: Instant::now() };
    let app = Router::new()
        .route("/metrics", get(list_metrics))
        .route("/metrics/{name}", get(get_metric))
        .route("/query", post(query_metric))
        .route("/dimensions", get(list_dimensions))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_metrics(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.orchestrator.catalog().metrics())
}

async fn get_metric(State(state): State<HttpState>, Path(name): Path<String>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.orchestrator.catalog().metric(&name)?))
}

async fn list_dimensions(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.orchestrator.catalog().dimensions())
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    metric: String,
    #[serde(default)]
    dimensions: Vec<String>,
    #[serde(default)]
    filters: Vec<String>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    columns: Vec<String>,
    rows: Vec<Vec<serde_json::Value>>,
    dialect_text: String,
    cache_hit: bool,
}

async fn query_metric(State(state): State<HttpState>, Json(body): Json<QueryBody>) -> Result<impl IntoResponse, AppError> {
    let catalog = state.orchestrator.catalog().snapshot();
    let request = PlanRequest { metric: body.metric, dimensions: body.dimensions, filters: body.filters, order_by: None, limit: body.limit };
    let (rows, hit, dialect_text) = state.orchestrator.plan_and_execute(&catalog, &request).await?;
    Ok(Json(QueryResponse { columns: rows.columns, rows: rows.rows, dialect_text, cache_hit: hit }))
}

async fn cache_stats(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.orchestrator.cache().stats())
}

#[derive(Debug, Deserialize)]
struct ClearCacheBody {
    pattern: Option<String>,
}

async fn clear_cache(State(state): State<HttpState>, Json(body): Json<ClearCacheBody>) -> impl IntoResponse {
    let removed = state.orchestrator.cache().invalidate(body.pattern.as_deref());
    Json(json!({ "removed": removed }))
}

async fn status(State(state): State<HttpState>) -> impl IntoResponse {
    let stats = state.orchestrator.cache().stats();
    Json(json!({
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "sessions": state.orchestrator.sessions().len(),
        "cache": stats,
    }))
}
