//! End-to-end import pipeline tests against the in-memory stores

use std::io::Write;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bulkd_server::ingest::ImportPipeline;
use bulkd_server::models::{Job, JobKind, JobStatus, ResourceType, User};
use bulkd_server::repos::memory::{
    MemoryArticleStore, MemoryCommentStore, MemoryJobStore, MemoryStagingStore, MemoryUserStore,
};
use bulkd_server::repos::{JobStore, UserStore};

struct TestEnv {
    dir: TempDir,
    jobs: Arc<MemoryJobStore>,
    users: Arc<MemoryUserStore>,
    articles: Arc<MemoryArticleStore>,
    comments: Arc<MemoryCommentStore>,
    pipeline: ImportPipeline,
}

fn env_with_batch_size(batch_size: usize) -> TestEnv {
    let jobs = Arc::new(MemoryJobStore::new());
    let users = Arc::new(MemoryUserStore::new());
    let articles = Arc::new(MemoryArticleStore::new());
    let comments = Arc::new(MemoryCommentStore::new());
    let staging = Arc::new(MemoryStagingStore::new(
        users.clone(),
        articles.clone(),
        comments.clone(),
    ));

    let pipeline = ImportPipeline::new(
        jobs.clone(),
        staging,
        users.clone(),
        articles.clone(),
        comments.clone(),
        batch_size,
    );

    TestEnv {
        dir: TempDir::new().expect("temp dir"),
        jobs,
        users,
        articles,
        comments,
        pipeline,
    }
}

fn test_env() -> TestEnv {
    env_with_batch_size(1000)
}

impl TestEnv {
    fn write_file(&self, name: &str, contents: &str) -> String {
        let path = self.dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create test file");
        file.write_all(contents.as_bytes()).expect("write test file");
        path.to_string_lossy().to_string()
    }

    fn import_job(&self, resource: ResourceType, file_path: String) -> Job {
        let mut job = Job::new(JobKind::Import, resource);
        job.file_path = Some(file_path);
        job
    }

    async fn run_import(&self, resource: ResourceType, name: &str, contents: &str) -> Job {
        let path = self.write_file(name, contents);
        let job = self.import_job(resource, path);
        self.jobs.create(&job).await.unwrap();
        self.pipeline
            .run(&job, &CancellationToken::new())
            .await
            .unwrap();
        self.jobs.get(job.id).await.unwrap().unwrap()
    }

    async fn seed_user(&self, id: Uuid, email: &str) {
        self.users
            .batch_upsert(&[User {
                id,
                email: email.to_string(),
                name: "Seeded".into(),
                role: "admin".into(),
                active: true,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            }])
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn users_happy_path_csv() {
    let env = test_env();
    let csv = "id,email,name,role,active,created_at\n\
        5864905b-ec8c-4fa6-8ba7-545d13f29b4e,Alice@Example.com,Alice,admin,true,2024-01-15T10:30:00Z\n\
        6f304cd1-8a43-4417-aec7-55f419572494,bob@example.com,Bob,reader,false,2024-01-16T10:30:00Z\n";

    let job = env.run_import(ResourceType::Users, "users.csv", csv).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 2);
    assert_eq!(job.successful_records, 2);
    assert_eq!(job.failed_records, 0);
    assert_eq!(job.processed_records, 2);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let stored = env.users.all();
    assert_eq!(stored.len(), 2);
    // Emails are normalized to lower case at the staging boundary
    assert!(stored.iter().any(|u| u.email == "alice@example.com"));
    assert!(stored.iter().any(|u| u.email == "bob@example.com"));
}

#[tokio::test]
async fn users_invalid_role_and_missing_email() {
    let env = test_env();
    let csv = "id,email,name,role,active\n\
        ,foo@bar,Test,manager,true\n\
        ,,X,admin,true\n";

    let job = env.run_import(ResourceType::Users, "users.csv", csv).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 2);
    assert_eq!(job.successful_records, 0);
    assert_eq!(job.failed_records, 2);
    assert!(env.users.all().is_empty());

    let errors = env.jobs.errors_for(job.id);
    assert!(errors.len() >= 3);
    assert!(errors.iter().any(|e| e.error_code == "INVALID_EMAIL"));
    assert!(errors.iter().any(|e| e.error_code == "INVALID_ROLE"));
    assert!(errors
        .iter()
        .any(|e| e.error_code == "MISSING_FIELD" && e.field_name.as_deref() == Some("email")));
}

#[tokio::test]
async fn article_with_space_slug_is_rejected() {
    let env = test_env();
    let author = Uuid::new_v4();
    env.seed_user(author, "author@example.com").await;

    let ndjson = format!(
        "{{\"id\":\"{}\",\"slug\":\"Draft Fast\",\"title\":\"T\",\"body\":\"B\",\"author_id\":\"{}\",\"status\":\"draft\"}}\n",
        Uuid::new_v4(),
        author
    );

    let job = env
        .run_import(ResourceType::Articles, "articles.ndjson", &ndjson)
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 1);
    assert_eq!(job.successful_records, 0);
    assert_eq!(job.failed_records, 1);
    assert!(env.articles.all().is_empty());

    let errors = env.jobs.errors_for(job.id);
    assert!(errors.iter().any(|e| e.error_code == "INVALID_SLUG"));
}

#[tokio::test]
async fn articles_with_unknown_author_fail_fk_check() {
    let env = test_env();
    // A valid user exists, but the articles reference someone else
    env.seed_user(Uuid::new_v4(), "real@example.com").await;

    let ghost = Uuid::new_v4();
    let mut ndjson = String::new();
    for i in 0..3 {
        ndjson.push_str(&format!(
            "{{\"slug\":\"post-{i}\",\"title\":\"T\",\"body\":\"B\",\"author_id\":\"{ghost}\",\"status\":\"draft\"}}\n"
        ));
    }

    let job = env
        .run_import(ResourceType::Articles, "articles.ndjson", &ndjson)
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 3);
    assert_eq!(job.successful_records, 0);
    assert_eq!(job.failed_records, 3);
    assert!(env.articles.all().is_empty());

    let errors = env.jobs.errors_for(job.id);
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.error_code == "INVALID_AUTHOR_FK"));
}

#[tokio::test]
async fn duplicate_email_within_file_first_occurrence_wins() {
    let env = test_env();
    let csv = "email,name,role\n\
        dup@example.com,First,admin\n\
        dup@example.com,Second,reader\n";

    let job = env.run_import(ResourceType::Users, "users.csv", csv).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 2);
    assert_eq!(job.successful_records, 1);
    assert_eq!(job.failed_records, 1);

    let stored = env.users.all();
    let matching: Vec<_> = stored.iter().filter(|u| u.email == "dup@example.com").collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].name, "First");

    let errors = env.jobs.errors_for(job.id);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_code, "DUPLICATE_EMAIL");
    // The later row is the duplicate
    assert_eq!(errors[0].row_number, 3);
}

#[tokio::test]
async fn malformed_ndjson_line_is_isolated() {
    let env = test_env();
    let ndjson = "{\"email\":\"good@example.com\",\"name\":\"Good\",\"role\":\"admin\"}\n\
        this is not json\n\
        {\"email\":\"also@example.com\",\"name\":\"Also\",\"role\":\"reader\"}\n";

    let job = env
        .run_import(ResourceType::Users, "users.ndjson", ndjson)
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 3);
    assert_eq!(job.successful_records, 2);
    assert_eq!(job.failed_records, 1);

    let errors = env.jobs.errors_for(job.id);
    let parse_errors: Vec<_> = errors
        .iter()
        .filter(|e| e.error_code == "FILE_PARSE_ERROR")
        .collect();
    assert_eq!(parse_errors.len(), 1);
    assert_eq!(parse_errors[0].row_number, 2);
    assert_eq!(parse_errors[0].raw_data.as_deref(), Some("this is not json"));
}

#[tokio::test]
async fn rerunning_the_same_file_is_idempotent() {
    let env = test_env();
    let existing = Uuid::new_v4();
    let csv = format!(
        "id,email,name,role\n{existing},stable@example.com,Stable,admin\n"
    );

    let first = env.run_import(ResourceType::Users, "a.csv", &csv).await;
    assert_eq!(first.successful_records, 1);

    let second = env.run_import(ResourceType::Users, "b.csv", &csv).await;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.successful_records, 1);

    // Same natural key, same row count: the second run updated in place
    let stored = env.users.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].email, "stable@example.com");
}

#[tokio::test]
async fn duplicate_against_existing_rows_is_rejected() {
    let env = test_env();
    env.seed_user(Uuid::new_v4(), "taken@example.com").await;

    // No id on the incoming row, so this is a conflict rather than an update
    let csv = "email,name,role\ntaken@example.com,Intruder,reader\n";
    let job = env.run_import(ResourceType::Users, "users.csv", csv).await;

    assert_eq!(job.successful_records, 0);
    assert_eq!(job.failed_records, 1);

    let errors = env.jobs.errors_for(job.id);
    assert_eq!(errors[0].error_code, "DUPLICATE_EMAIL");

    // The seeded row is untouched
    let stored = env.users.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "Seeded");
}

#[tokio::test]
async fn comments_import_with_fk_checks() {
    let env = test_env();
    let user_id = Uuid::new_v4();
    env.seed_user(user_id, "commenter@example.com").await;

    // One article to attach the valid comment to
    let author = Uuid::new_v4();
    env.seed_user(author, "author@example.com").await;
    let article_ndjson = format!(
        "{{\"slug\":\"commented-post\",\"title\":\"T\",\"body\":\"B\",\"author_id\":\"{author}\",\"status\":\"draft\"}}\n"
    );
    env.run_import(ResourceType::Articles, "articles.ndjson", &article_ndjson)
        .await;
    let article_id = env.articles.all()[0].id;

    let ghost_article = Uuid::new_v4();
    let ndjson = format!(
        "{{\"article_id\":\"{article_id}\",\"user_id\":\"{user_id}\",\"body\":\"Great post\"}}\n\
         {{\"article_id\":\"{ghost_article}\",\"user_id\":\"{user_id}\",\"body\":\"Orphan\"}}\n"
    );

    let job = env
        .run_import(ResourceType::Comments, "comments.ndjson", &ndjson)
        .await;

    assert_eq!(job.total_records, 2);
    assert_eq!(job.successful_records, 1);
    assert_eq!(job.failed_records, 1);

    let errors = env.jobs.errors_for(job.id);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_code, "INVALID_ARTICLE_FK");

    let stored = env.comments.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].body, "Great post");
}

#[tokio::test]
async fn small_batch_size_flushes_progress_between_batches() {
    let env = env_with_batch_size(2);
    let mut csv = String::from("email,name,role\n");
    for i in 0..7 {
        csv.push_str(&format!("user{i}@example.com,User {i},reader\n"));
    }

    let job = env.run_import(ResourceType::Users, "users.csv", &csv).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 7);
    assert_eq!(job.successful_records, 7);
    assert_eq!(env.users.all().len(), 7);
}

#[tokio::test]
async fn pre_cancelled_job_stops_before_promotion() {
    let env = test_env();
    let path = env.write_file(
        "users.csv",
        "email,name,role\ncancel@example.com,Cancel,admin\n",
    );
    let job = env.import_job(ResourceType::Users, path);
    env.jobs.create(&job).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    env.pipeline.run(&job, &cancel).await.unwrap();

    let job = env.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error_message.as_deref(), Some("cancelled"));
    assert!(env.users.all().is_empty());
}

#[tokio::test]
async fn missing_file_fails_the_job() {
    let env = test_env();
    let job = env.import_job(ResourceType::Users, "/nonexistent/file.csv".into());
    env.jobs.create(&job).await.unwrap();

    let result = env.pipeline.run(&job, &CancellationToken::new()).await;
    assert!(result.is_err());

    let job = env.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_some());
}

#[tokio::test]
async fn counters_reconcile_at_completion() {
    let env = test_env();
    let csv = "email,name,role\n\
        ok@example.com,Ok,admin\n\
        bad-email,Bad,admin\n\
        ok@example.com,Dup,reader\n";

    let job = env.run_import(ResourceType::Users, "users.csv", csv).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.processed_records,
        job.successful_records + job.failed_records
    );
    assert_eq!(job.total_records, 3);
    assert_eq!(job.successful_records, 1);
    assert_eq!(job.failed_records, 2);
}
