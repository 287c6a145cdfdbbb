//! Storage capability traits and their PostgreSQL implementations
//!
//! The pipeline and HTTP layer depend only on the narrow traits below; the
//! Postgres implementations live in the sibling modules and an in-memory
//! variant (`memory`) backs fast tests.

pub mod articles;
pub mod comments;
pub mod idempotency;
pub mod jobs;
pub mod memory;
pub mod staging;
pub mod users;

pub use articles::PgArticleStore;
pub use comments::PgCommentStore;
pub use idempotency::PgIdempotencyStore;
pub use jobs::PgJobStore;
pub use staging::PgStagingStore;
pub use users::PgUserStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Article, Comment, ExportFilters, Job, JobError, User};

/// Postgres limits bind parameters to u16::MAX per statement; multi-row
/// VALUES lists are chunked to stay under it.
pub(crate) const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per insert chunk for a statement binding `cols` parameters per row
pub(crate) fn rows_per_chunk(cols: usize) -> usize {
    (MAX_BIND_PARAMS / cols).max(1)
}

/// Keyset cursor for forward-only target-relation streaming
pub type PageCursor = (DateTime<Utc>, Uuid);

/// A staged user row awaiting promotion
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct StagingUser {
    pub staging_id: i64,
    pub job_id: Uuid,
    pub row_number: i64,
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub validation_error: Option<String>,
    pub is_valid: bool,
    pub is_duplicate: bool,
    pub processed: bool,
}

/// A staged article row awaiting promotion
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct StagingArticle {
    pub staging_id: i64,
    pub job_id: Uuid,
    pub row_number: i64,
    pub id: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author_id: Option<String>,
    /// JSON array of tag strings, serialized
    pub tags: Option<String>,
    pub published_at: Option<String>,
    pub status: Option<String>,
    pub validation_error: Option<String>,
    pub is_valid: bool,
    pub is_duplicate: bool,
    pub processed: bool,
}

/// A staged comment row awaiting promotion
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct StagingComment {
    pub staging_id: i64,
    pub job_id: Uuid,
    pub row_number: i64,
    pub id: Option<String>,
    pub article_id: Option<String>,
    pub user_id: Option<String>,
    pub body: Option<String>,
    pub created_at: Option<String>,
    pub validation_error: Option<String>,
    pub is_valid: bool,
    pub is_duplicate: bool,
    pub processed: bool,
}

/// Job record persistence and the error journal
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> AppResult<()>;
    async fn get(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// pending -> processing, sets started_at
    async fn set_started(&self, id: Uuid) -> AppResult<()>;
    /// processing -> completed with final counters, sets completed_at
    async fn set_completed(&self, id: Uuid, successful: i64, failed: i64) -> AppResult<()>;
    /// any non-terminal -> failed, sets completed_at
    async fn set_failed(&self, id: Uuid, error_message: &str) -> AppResult<()>;
    /// any non-terminal -> cancelled, sets completed_at
    async fn set_cancelled(&self, id: Uuid, message: &str) -> AppResult<()>;

    async fn set_total_records(&self, id: Uuid, total: i64) -> AppResult<()>;
    async fn update_progress(
        &self,
        id: Uuid,
        processed: i64,
        successful: i64,
        failed: i64,
    ) -> AppResult<()>;
    async fn update_file_path(&self, id: Uuid, file_path: &str) -> AppResult<()>;

    async fn add_errors(&self, errors: &[JobError]) -> AppResult<()>;
    /// Returns (page of errors ordered by row_number, total count)
    async fn errors_page(
        &self,
        job_id: Uuid,
        page: i64,
        per_page: i64,
    ) -> AppResult<(Vec<JobError>, i64)>;

    /// Job counts grouped by status, for the stats endpoint
    async fn counts_by_status(&self) -> AppResult<Vec<(String, i64)>>;
}

/// Idempotency key mapping with TTL
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn put(&self, key: &str, job_id: Uuid, expires_at: DateTime<Utc>) -> AppResult<()>;
    /// Returns the mapped job id if the key exists and has not expired
    async fn get_live(&self, key: &str) -> AppResult<Option<Uuid>>;
    /// Janitor: drop expired keys, returning how many were removed
    async fn delete_expired(&self) -> AppResult<u64>;
}

/// Per-job staging relation operations
///
/// Every `mark_*` operation is a single set-based statement returning the
/// number of rows it reclassified; all operations are idempotent under retry
/// within the same job.
#[async_trait]
pub trait StagingStore: Send + Sync {
    // Users
    async fn create_staging_users(&self, job_id: Uuid, rows: &[StagingUser]) -> AppResult<()>;
    async fn mark_duplicate_users_in_batch(&self, job_id: Uuid) -> AppResult<u64>;
    async fn mark_duplicate_users_against_existing(&self, job_id: Uuid) -> AppResult<u64>;
    async fn next_valid_users(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingUser>>;
    async fn invalid_users(&self, job_id: Uuid) -> AppResult<Vec<StagingUser>>;
    async fn cleanup_users(&self, job_id: Uuid) -> AppResult<()>;

    // Articles
    async fn create_staging_articles(
        &self,
        job_id: Uuid,
        rows: &[StagingArticle],
    ) -> AppResult<()>;
    async fn mark_duplicate_articles_in_batch(&self, job_id: Uuid) -> AppResult<u64>;
    async fn mark_duplicate_articles_against_existing(&self, job_id: Uuid) -> AppResult<u64>;
    async fn mark_invalid_author_fk_articles(&self, job_id: Uuid) -> AppResult<u64>;
    async fn next_valid_articles(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingArticle>>;
    async fn invalid_articles(&self, job_id: Uuid) -> AppResult<Vec<StagingArticle>>;
    async fn cleanup_articles(&self, job_id: Uuid) -> AppResult<()>;

    // Comments
    async fn create_staging_comments(
        &self,
        job_id: Uuid,
        rows: &[StagingComment],
    ) -> AppResult<()>;
    async fn mark_duplicate_comments_in_batch(&self, job_id: Uuid) -> AppResult<u64>;
    async fn mark_invalid_fk_comments(&self, job_id: Uuid) -> AppResult<u64>;
    async fn next_valid_comments(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingComment>>;
    async fn invalid_comments(&self, job_id: Uuid) -> AppResult<Vec<StagingComment>>;
    async fn cleanup_comments(&self, job_id: Uuid) -> AppResult<()>;
}

/// Target relation access for users
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Multi-row upsert keyed on email; returns affected row count
    async fn batch_upsert(&self, users: &[User]) -> AppResult<u64>;
    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, User>>;
    async fn exists(&self, id: Uuid) -> AppResult<bool>;
    async fn count(&self, filters: &ExportFilters) -> AppResult<i64>;
    /// Forward-only keyset page ordered by (created_at, id) ascending
    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<User>>;
}

/// Target relation access for articles
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Multi-row upsert keyed on slug; returns affected row count
    async fn batch_upsert(&self, articles: &[Article]) -> AppResult<u64>;
    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Article>>;
    async fn exists(&self, id: Uuid) -> AppResult<bool>;
    async fn count(&self, filters: &ExportFilters) -> AppResult<i64>;
    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<Article>>;
}

/// Target relation access for comments
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Multi-row upsert keyed on id; returns affected row count
    async fn batch_upsert(&self, comments: &[Comment]) -> AppResult<u64>;
    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Comment>>;
    async fn exists(&self, id: Uuid) -> AppResult<bool>;
    async fn count(&self, filters: &ExportFilters) -> AppResult<i64>;
    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<Comment>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_chunk() {
        // users bind 7 columns per row
        assert_eq!(rows_per_chunk(7), 65_535 / 7);
        // degenerate case still makes progress
        assert_eq!(rows_per_chunk(100_000), 1);
    }
}
