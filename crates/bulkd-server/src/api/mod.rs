//! HTTP surface

pub mod exports;
pub mod health;
pub mod imports;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::export::ExportService;
use crate::ingest::intake::FileIntake;
use crate::repos::{IdempotencyStore, JobStore};
use crate::worker::WorkerPool;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub jobs: Arc<dyn JobStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub exporter: Arc<ExportService>,
    pub intake: FileIntake,
    pub workers: Arc<WorkerPool>,
}

/// Build the application router with all routes and middleware
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_file_size_bytes() as usize + 1024 * 1024;

    Router::new()
        .route("/v1/imports", post(imports::create_import))
        .route("/v1/imports/:job_id", get(imports::get_import_status))
        .route("/v1/imports/:job_id/errors", get(imports::get_import_errors))
        .route("/v1/exports", post(exports::create_export).get(exports::stream_export))
        .route("/v1/exports/:job_id/download", get(exports::download_export))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        .route("/stats", get(health::stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .with_state(state)
}
