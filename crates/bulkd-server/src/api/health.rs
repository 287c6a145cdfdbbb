//! Health, readiness, and stats endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;

/// GET /health: process and database health
pub async fn health(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "unreachable"
                })),
            )
                .into_response()
        }
    }
}

/// GET /ready: ready to accept traffic
pub async fn ready(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "ready": true }))).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false })),
        )
            .into_response(),
    }
}

/// GET /live: process liveness
pub async fn live() -> Response {
    (StatusCode::OK, Json(json!({ "alive": true }))).into_response()
}

/// GET /stats: queue depths and job counts by status
pub async fn stats(State(state): State<AppState>) -> Response {
    let queues = state.workers.queue_stats();

    match state.jobs.counts_by_status().await {
        Ok(counts) => {
            let jobs: serde_json::Map<String, serde_json::Value> = counts
                .into_iter()
                .map(|(status, count)| (status, json!(count)))
                .collect();

            (
                StatusCode::OK,
                Json(json!({
                    "queues": queues,
                    "jobs": jobs,
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to fetch job stats: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to fetch stats" })),
            )
                .into_response()
        }
    }
}
