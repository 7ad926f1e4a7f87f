use crate::config::ServeConfig;
use crate::lifecycle::{Engine, EngineStatus};
use crate::replay::StatementRecord;
use crate::view::{ViewError, ViewRow, WorkloadView};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    view: WorkloadView,
}

/// Caller-side filter on the view; the view itself never filters.
#[derive(Debug, Default, Deserialize)]
struct WorkloadFilter {
    workload: Option<String>,
}

/// Routes for the read-only view and the statement ingestion endpoint.
pub fn router(engine: Arc<Engine>) -> Router {
    let state = AppState {
        view: WorkloadView::new(engine.clone()),
        engine,
    };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/workloads", get(api_workloads))
        .route("/api/statements", post(api_statements))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn run(
    config: &ServeConfig,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(engine);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("serve listening on {local_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

async fn api_workloads(
    State(state): State<AppState>,
    Query(filter): Query<WorkloadFilter>,
) -> Result<Json<Vec<ViewRow>>, StatusCode> {
    let mut rows = state.view.rows().map_err(|e| match e {
        ViewError::NotActive => StatusCode::SERVICE_UNAVAILABLE,
        ViewError::ReadOnly => StatusCode::METHOD_NOT_ALLOWED,
    })?;
    if let Some(workload) = filter.workload {
        rows.retain(|r| r.workload == workload);
    }
    Ok(Json(rows))
}

/// Accept one completed statement from an external executor.
async fn api_statements(
    State(state): State<AppState>,
    Json(record): Json<StatementRecord>,
) -> (StatusCode, Json<serde_json::Value>) {
    let key = state.engine.on_query_event(&record.event());
    let workload = key.as_ref().map(|k| k.name());
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"counted": key.is_some(), "workload": workload})),
    )
}
