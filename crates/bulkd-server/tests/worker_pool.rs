//! Worker pool behavior tests against the in-memory stores

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use bulkd_server::config::WorkerConfig;
use bulkd_server::export::ExportService;
use bulkd_server::ingest::ImportPipeline;
use bulkd_server::models::{
    ExportFilters, ExportFormat, Job, JobKind, JobStatus, ResourceType, User,
};
use bulkd_server::repos::memory::{
    MemoryArticleStore, MemoryCommentStore, MemoryJobStore, MemoryStagingStore, MemoryUserStore,
};
use bulkd_server::repos::{JobStore, UserStore};
use bulkd_server::worker::{ExportRequest, ImportRequest, WorkerPool};

struct PoolEnv {
    dir: TempDir,
    jobs: Arc<MemoryJobStore>,
    users: Arc<MemoryUserStore>,
    pool: Arc<WorkerPool>,
}

fn pool_env(config: &WorkerConfig) -> PoolEnv {
    let dir = TempDir::new().expect("temp dir");
    let jobs = Arc::new(MemoryJobStore::new());
    let users = Arc::new(MemoryUserStore::new());
    let articles = Arc::new(MemoryArticleStore::new());
    let comments = Arc::new(MemoryCommentStore::new());
    let staging = Arc::new(MemoryStagingStore::new(
        users.clone(),
        articles.clone(),
        comments.clone(),
    ));

    let pipeline = Arc::new(ImportPipeline::new(
        jobs.clone(),
        staging,
        users.clone(),
        articles.clone(),
        comments.clone(),
        1000,
    ));

    let exporter = Arc::new(ExportService::new(
        jobs.clone(),
        users.clone(),
        articles,
        comments,
        1000,
        dir.path().to_path_buf(),
    ));

    let pool = WorkerPool::start(config, pipeline, exporter, jobs.clone());

    PoolEnv {
        dir,
        jobs,
        users,
        pool,
    }
}

fn default_config() -> WorkerConfig {
    WorkerConfig {
        import_workers: 2,
        export_workers: 1,
        queue_size: 10,
    }
}

async fn wait_for_terminal(jobs: &MemoryJobStore, job_id: Uuid) -> Job {
    for _ in 0..200 {
        if let Some(job) = jobs.get(job_id).await.unwrap() {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}

#[tokio::test]
async fn import_submitted_to_pool_runs_to_completion() {
    let env = pool_env(&default_config());

    let path = env.dir.path().join("users.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"email,name,role\npool@example.com,Pool,admin\n")
        .unwrap();

    let mut job = Job::new(JobKind::Import, ResourceType::Users);
    job.file_path = Some(path.to_string_lossy().to_string());
    env.jobs.create(&job).await.unwrap();

    env.pool
        .submit_import(ImportRequest {
            job: job.clone(),
            cleanup_path: Some(path.to_string_lossy().to_string()),
        })
        .unwrap();

    let finished = wait_for_terminal(&env.jobs, job.id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.successful_records, 1);
    assert_eq!(env.users.all().len(), 1);

    // The worker owns the file and removes it after processing
    for _ in 0..100 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!path.exists());

    env.pool.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn export_submitted_to_pool_writes_file() {
    let env = pool_env(&default_config());

    env.users
        .batch_upsert(&[User {
            id: Uuid::new_v4(),
            email: "export@example.com".into(),
            name: "Export".into(),
            role: "reader".into(),
            active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }])
        .await
        .unwrap();

    let mut job = Job::new(JobKind::Export, ResourceType::Users);
    job.file_format = Some("ndjson".into());
    env.jobs.create(&job).await.unwrap();

    env.pool
        .submit_export(ExportRequest {
            job: job.clone(),
            format: ExportFormat::Ndjson,
            filters: ExportFilters::default(),
        })
        .unwrap();

    let finished = wait_for_terminal(&env.jobs, job.id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.successful_records, 1);
    assert_eq!(finished.total_records, 1);

    let file_path = finished.file_path.expect("export file path");
    let contents = std::fs::read_to_string(&file_path).unwrap();
    assert!(contents.contains("export@example.com"));

    env.pool.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn cancelling_a_pending_job_marks_it_cancelled() {
    let env = pool_env(&default_config());

    let job = Job::new(JobKind::Import, ResourceType::Users);
    env.jobs.create(&job).await.unwrap();

    // Never submitted to the pool, so cancellation is immediate
    env.pool.cancel_job(job.id).await.unwrap();

    let cancelled = env.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    env.pool.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn queue_stats_report_configured_capacity() {
    let env = pool_env(&default_config());

    let stats = env.pool.queue_stats();
    assert_eq!(stats.import_capacity, 10);
    assert_eq!(stats.export_capacity, 10);

    env.pool.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn shutdown_completes_within_deadline() {
    let env = pool_env(&default_config());

    let started = std::time::Instant::now();
    env.pool.shutdown(Duration::from_secs(5)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
}
