//! bulkd server - main entry point

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use bulkd_common::logging::{init_logging, LogConfig};
use bulkd_server::api::{self, AppState};
use bulkd_server::config::Config;
use bulkd_server::db;
use bulkd_server::export::ExportService;
use bulkd_server::ingest::intake::FileIntake;
use bulkd_server::ingest::ImportPipeline;
use bulkd_server::repos::{
    ArticleStore, CommentStore, IdempotencyStore, JobStore, PgArticleStore, PgCommentStore,
    PgIdempotencyStore, PgJobStore, PgStagingStore, PgUserStore, StagingStore, UserStore,
};
use bulkd_server::worker::{spawn_idempotency_janitor, WorkerPool};

/// How often the janitor sweeps expired idempotency keys
const JANITOR_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_filter_directives("bulkd_server=debug,tower_http=debug,sqlx=warn");
    init_logging(&log_config)?;

    info!("Starting bulkd server");

    let config = Arc::new(Config::load()?);
    info!(
        env = %config.app.env,
        port = config.app.port,
        "Configuration loaded"
    );

    let pool = db::connect(&config.database).await?;
    info!("Database connection pool established");

    db::migrate(&pool).await?;
    info!("Database migrations completed");

    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let idempotency: Arc<dyn IdempotencyStore> = Arc::new(PgIdempotencyStore::new(pool.clone()));
    let staging: Arc<dyn StagingStore> = Arc::new(PgStagingStore::new(pool.clone()));
    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone()));
    let articles: Arc<dyn ArticleStore> = Arc::new(PgArticleStore::new(pool.clone()));
    let comments: Arc<dyn CommentStore> = Arc::new(PgCommentStore::new(pool.clone()));

    let pipeline = Arc::new(ImportPipeline::new(
        jobs.clone(),
        staging,
        users.clone(),
        articles.clone(),
        comments.clone(),
        config.import.batch_size,
    ));

    let exporter = Arc::new(ExportService::new(
        jobs.clone(),
        users,
        articles,
        comments,
        config.export.batch_size,
        config.export.output_path.clone(),
    ));

    let workers = WorkerPool::start(&config.worker, pipeline, exporter.clone(), jobs.clone());

    let _janitor = spawn_idempotency_janitor(
        idempotency.clone(),
        JANITOR_INTERVAL,
        workers.shutdown_signal(),
    );

    let state = AppState {
        db: pool,
        config: config.clone(),
        jobs,
        idempotency,
        exporter,
        intake: FileIntake::new(
            config.import.upload_path.clone(),
            config.max_file_size_bytes(),
        ),
        workers: workers.clone(),
    };

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let active workers reach a safe point before exiting
    workers.shutdown(config.shutdown_timeout()).await;

    info!("Server shut down gracefully");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
