//! Bounded-channel worker pool
//!
//! Two bounded queues, one per job direction, drained by dedicated workers.
//! Submission onto a full queue fails synchronously. A submitted import
//! carries its file path; the worker that picks it up owns the file and
//! deletes it after processing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{AppError, AppResult};
use crate::export::ExportService;
use crate::ingest::ImportPipeline;
use crate::models::{ExportFilters, ExportFormat, Job, JobStatus};
use crate::repos::{IdempotencyStore, JobStore};

/// An import job handed to the pool; the worker owns the file afterwards
pub struct ImportRequest {
    pub job: Job,
    /// Uploaded/downloaded file to delete once processing ends
    pub cleanup_path: Option<String>,
}

/// An export job handed to the pool
pub struct ExportRequest {
    pub job: Job,
    pub format: ExportFormat,
    pub filters: ExportFilters,
}

/// Queue depths reported by the stats endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub import_queued: usize,
    pub import_capacity: usize,
    pub export_queued: usize,
    pub export_capacity: usize,
}

/// Worker pool with per-direction bounded channels
pub struct WorkerPool {
    import_tx: mpsc::Sender<ImportRequest>,
    export_tx: mpsc::Sender<ExportRequest>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
    active: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    jobs: Arc<dyn JobStore>,
    queue_size: usize,
}

impl WorkerPool {
    /// Start import and export workers and return the pool handle
    pub fn start(
        config: &WorkerConfig,
        pipeline: Arc<ImportPipeline>,
        exporter: Arc<ExportService>,
        jobs: Arc<dyn JobStore>,
    ) -> Arc<Self> {
        let (import_tx, import_rx) = mpsc::channel::<ImportRequest>(config.queue_size);
        let (export_tx, export_rx) = mpsc::channel::<ExportRequest>(config.queue_size);

        let shutdown_token = CancellationToken::new();
        let active: Arc<Mutex<HashMap<Uuid, CancellationToken>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let import_rx = Arc::new(tokio::sync::Mutex::new(import_rx));
        let export_rx = Arc::new(tokio::sync::Mutex::new(export_rx));

        let mut handles = Vec::new();

        for worker_id in 0..config.import_workers {
            handles.push(tokio::spawn(import_worker(
                worker_id,
                import_rx.clone(),
                pipeline.clone(),
                jobs.clone(),
                active.clone(),
                shutdown_token.clone(),
            )));
        }

        for worker_id in 0..config.export_workers {
            handles.push(tokio::spawn(export_worker(
                worker_id,
                export_rx.clone(),
                exporter.clone(),
                jobs.clone(),
                active.clone(),
                shutdown_token.clone(),
            )));
        }

        info!(
            import_workers = config.import_workers,
            export_workers = config.export_workers,
            queue_size = config.queue_size,
            "Worker pool started"
        );

        Arc::new(Self {
            import_tx,
            export_tx,
            handles: Mutex::new(handles),
            shutdown_token,
            active,
            jobs,
            queue_size: config.queue_size,
        })
    }

    /// Enqueue an import; fails synchronously when the queue is full
    pub fn submit_import(&self, request: ImportRequest) -> AppResult<()> {
        self.import_tx
            .try_send(request)
            .map_err(|_| AppError::QueueFull)
    }

    /// Enqueue an export; fails synchronously when the queue is full
    pub fn submit_export(&self, request: ExportRequest) -> AppResult<()> {
        self.export_tx
            .try_send(request)
            .map_err(|_| AppError::QueueFull)
    }

    /// Cancel a job: cooperative for a processing job, immediate for a
    /// pending one
    pub async fn cancel_job(&self, job_id: Uuid) -> AppResult<()> {
        let token = self.active.lock().unwrap().get(&job_id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => self.jobs.set_cancelled(job_id, "cancelled").await,
        }
    }

    /// Token cancelled when the pool shuts down; background tasks tie
    /// their lifetime to it
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Current queue depths
    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            import_queued: self.queue_size - self.import_tx.capacity(),
            import_capacity: self.queue_size,
            export_queued: self.queue_size - self.export_tx.capacity(),
            export_capacity: self.queue_size,
        }
    }

    /// Stop accepting signals and wait for active workers up to the deadline
    pub async fn shutdown(&self, deadline: Duration) {
        self.shutdown_token.cancel();

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        let joined = futures::future::join_all(handles);

        if tokio::time::timeout(deadline, joined).await.is_err() {
            warn!("Worker pool shutdown deadline exceeded");
        } else {
            info!("Worker pool stopped");
        }
    }
}

async fn import_worker(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ImportRequest>>>,
    pipeline: Arc<ImportPipeline>,
    jobs: Arc<dyn JobStore>,
    active: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
) {
    info!(worker_id, kind = "import", "Worker started");

    loop {
        let request = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            }
        };

        let job_id = request.job.id;

        // A job cancelled while queued is skipped outright
        match jobs.get(job_id).await {
            Ok(Some(current)) if current.status != JobStatus::Pending => {
                info!(worker_id, job_id = %job_id, status = %current.status, "Skipping non-pending job");
            }
            _ => {
                let token = shutdown.child_token();
                active.lock().unwrap().insert(job_id, token.clone());

                if let Err(e) = pipeline.run(&request.job, &token).await {
                    error!(worker_id, job_id = %job_id, error = %e, "Import processing failed");
                }

                active.lock().unwrap().remove(&job_id);
            }
        }

        if let Some(path) = &request.cleanup_path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path, error = %e, "Failed to remove import file");
            }
        }
    }

    info!(worker_id, kind = "import", "Worker stopped");
}

async fn export_worker(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ExportRequest>>>,
    exporter: Arc<ExportService>,
    jobs: Arc<dyn JobStore>,
    active: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
) {
    info!(worker_id, kind = "export", "Worker started");

    loop {
        let request = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            }
        };

        let job_id = request.job.id;

        match jobs.get(job_id).await {
            Ok(Some(current)) if current.status != JobStatus::Pending => {
                info!(worker_id, job_id = %job_id, status = %current.status, "Skipping non-pending job");
            }
            _ => {
                let token = shutdown.child_token();
                active.lock().unwrap().insert(job_id, token.clone());

                if let Err(e) = exporter
                    .run(&request.job, request.format, &request.filters, &token)
                    .await
                {
                    error!(worker_id, job_id = %job_id, error = %e, "Export processing failed");
                }

                active.lock().unwrap().remove(&job_id);
            }
        }
    }

    info!(worker_id, kind = "export", "Worker stopped");
}

/// Periodically drop expired idempotency keys
pub fn spawn_idempotency_janitor(
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match store.delete_expired().await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Expired idempotency keys removed"),
                        Err(e) => warn!(error = %e, "Idempotency janitor sweep failed"),
                    }
                }
            }
        }
    })
}
