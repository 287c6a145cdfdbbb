//! In-memory store implementations
//!
//! Behavioral mirrors of the PostgreSQL stores for fast tests: the pipeline
//! runs end-to-end against these without a database. Mark operations follow
//! the same semantics as the SQL statements, including first-occurrence-wins
//! ordering by staging_id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{
    ArticleStore, CommentStore, IdempotencyStore, JobStore, PageCursor, StagingArticle,
    StagingComment, StagingStore, StagingUser, UserStore,
};
use crate::error::codes;
use crate::error::AppResult;
use crate::models::{Article, Comment, ExportFilters, Job, JobError, JobStatus, User};

/// In-memory job store
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    errors: Mutex<Vec<JobError>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: all journal entries for a job, ordered by row number
    pub fn errors_for(&self, job_id: Uuid) -> Vec<JobError> {
        let mut errors: Vec<_> = self
            .errors
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        errors.sort_by_key(|e| e.row_number);
        errors
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> AppResult<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn set_started(&self, id: Uuid) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_completed(&self, id: Uuid, successful: i64, failed: i64) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Completed;
                job.successful_records = successful;
                job.failed_records = failed;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_failed(&self, id: Uuid, error_message: &str) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Failed;
                job.error_message = Some(error_message.to_string());
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_cancelled(&self, id: Uuid, message: &str) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Cancelled;
                job.error_message = Some(message.to_string());
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_total_records(&self, id: Uuid, total: i64) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.total_records = total;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        processed: i64,
        successful: i64,
        failed: i64,
    ) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.processed_records = processed;
            job.successful_records = successful;
            job.failed_records = failed;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_file_path(&self, id: Uuid, file_path: &str) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.file_path = Some(file_path.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn add_errors(&self, errors: &[JobError]) -> AppResult<()> {
        self.errors.lock().unwrap().extend_from_slice(errors);
        Ok(())
    }

    async fn errors_page(
        &self,
        job_id: Uuid,
        page: i64,
        per_page: i64,
    ) -> AppResult<(Vec<JobError>, i64)> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 1000);
        let all = self.errors_for(job_id);
        let total = all.len() as i64;
        let start = ((page - 1) * per_page) as usize;
        let page_items = all.into_iter().skip(start).take(per_page as usize).collect();
        Ok((page_items, total))
    }

    async fn counts_by_status(&self) -> AppResult<Vec<(String, i64)>> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for job in self.jobs.lock().unwrap().values() {
            *counts.entry(job.status.as_str().to_string()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

/// In-memory idempotency key store
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    keys: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn put(&self, key: &str, job_id: Uuid, expires_at: DateTime<Utc>) -> AppResult<()> {
        self.keys
            .lock()
            .unwrap()
            .insert(key.to_string(), (job_id, expires_at));
        Ok(())
    }

    async fn get_live(&self, key: &str) -> AppResult<Option<Uuid>> {
        let keys = self.keys.lock().unwrap();
        Ok(keys
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(job_id, _)| *job_id))
    }

    async fn delete_expired(&self) -> AppResult<u64> {
        let mut keys = self.keys.lock().unwrap();
        let before = keys.len();
        keys.retain(|_, (_, expires_at)| *expires_at >= Utc::now());
        Ok((before - keys.len()) as u64)
    }
}

/// In-memory user store
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: snapshot of all stored users
    pub fn all(&self) -> Vec<User> {
        self.users.lock().unwrap().clone()
    }

    fn matches(user: &User, filters: &ExportFilters) -> bool {
        if let Some(role) = &filters.role {
            if &user.role != role {
                return false;
            }
        }
        if let Some(active) = filters.active {
            if user.active != active {
                return false;
            }
        }
        if let Some(after) = filters.created_after {
            if user.created_at < after {
                return false;
            }
        }
        if let Some(before) = filters.created_before {
            if user.created_at > before {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn batch_upsert(&self, users: &[User]) -> AppResult<u64> {
        let mut store = self.users.lock().unwrap();
        for incoming in users {
            if let Some(existing) = store.iter_mut().find(|u| u.email == incoming.email) {
                existing.name = incoming.name.clone();
                existing.role = incoming.role.clone();
                existing.active = incoming.active;
                existing.updated_at = incoming.updated_at;
            } else {
                store.push(incoming.clone());
            }
        }
        Ok(users.len() as u64)
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, User>> {
        let store = self.users.lock().unwrap();
        Ok(store
            .iter()
            .filter(|u| ids.contains(&u.id))
            .map(|u| (u.id, u.clone()))
            .collect())
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.users.lock().unwrap().iter().any(|u| u.id == id))
    }

    async fn count(&self, filters: &ExportFilters) -> AppResult<i64> {
        let store = self.users.lock().unwrap();
        Ok(store.iter().filter(|u| Self::matches(u, filters)).count() as i64)
    }

    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<User>> {
        let store = self.users.lock().unwrap();
        let mut matching: Vec<_> = store
            .iter()
            .filter(|u| Self::matches(u, filters))
            .filter(|u| match cursor {
                Some((created_at, id)) => (u.created_at, u.id) > (created_at, id),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|u| (u.created_at, u.id));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

/// In-memory article store
#[derive(Default)]
pub struct MemoryArticleStore {
    articles: Mutex<Vec<Article>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: snapshot of all stored articles
    pub fn all(&self) -> Vec<Article> {
        self.articles.lock().unwrap().clone()
    }

    fn matches(article: &Article, filters: &ExportFilters) -> bool {
        if let Some(status) = &filters.status {
            if &article.status != status {
                return false;
            }
        }
        if let Some(author_id) = filters.author_id {
            if article.author_id != author_id {
                return false;
            }
        }
        if let Some(after) = filters.created_after {
            if article.created_at < after {
                return false;
            }
        }
        if let Some(before) = filters.created_before {
            if article.created_at > before {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn batch_upsert(&self, articles: &[Article]) -> AppResult<u64> {
        let mut store = self.articles.lock().unwrap();
        for incoming in articles {
            if let Some(existing) = store.iter_mut().find(|a| a.slug == incoming.slug) {
                existing.title = incoming.title.clone();
                existing.body = incoming.body.clone();
                existing.author_id = incoming.author_id;
                existing.tags = incoming.tags.clone();
                existing.published_at = incoming.published_at;
                existing.status = incoming.status.clone();
                existing.updated_at = incoming.updated_at;
            } else {
                store.push(incoming.clone());
            }
        }
        Ok(articles.len() as u64)
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Article>> {
        let store = self.articles.lock().unwrap();
        Ok(store
            .iter()
            .filter(|a| ids.contains(&a.id))
            .map(|a| (a.id, a.clone()))
            .collect())
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.articles.lock().unwrap().iter().any(|a| a.id == id))
    }

    async fn count(&self, filters: &ExportFilters) -> AppResult<i64> {
        let store = self.articles.lock().unwrap();
        Ok(store.iter().filter(|a| Self::matches(a, filters)).count() as i64)
    }

    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<Article>> {
        let store = self.articles.lock().unwrap();
        let mut matching: Vec<_> = store
            .iter()
            .filter(|a| Self::matches(a, filters))
            .filter(|a| match cursor {
                Some((created_at, id)) => (a.created_at, a.id) > (created_at, id),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|a| (a.created_at, a.id));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

/// In-memory comment store
#[derive(Default)]
pub struct MemoryCommentStore {
    comments: Mutex<Vec<Comment>>,
}

impl MemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: snapshot of all stored comments
    pub fn all(&self) -> Vec<Comment> {
        self.comments.lock().unwrap().clone()
    }

    fn matches(comment: &Comment, filters: &ExportFilters) -> bool {
        if let Some(article_id) = filters.article_id {
            if comment.article_id != article_id {
                return false;
            }
        }
        if let Some(user_id) = filters.user_id {
            if comment.user_id != user_id {
                return false;
            }
        }
        if let Some(after) = filters.created_after {
            if comment.created_at < after {
                return false;
            }
        }
        if let Some(before) = filters.created_before {
            if comment.created_at > before {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    async fn batch_upsert(&self, comments: &[Comment]) -> AppResult<u64> {
        let mut store = self.comments.lock().unwrap();
        for incoming in comments {
            if let Some(existing) = store.iter_mut().find(|c| c.id == incoming.id) {
                existing.article_id = incoming.article_id;
                existing.user_id = incoming.user_id;
                existing.body = incoming.body.clone();
                existing.updated_at = incoming.updated_at;
            } else {
                store.push(incoming.clone());
            }
        }
        Ok(comments.len() as u64)
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Comment>> {
        let store = self.comments.lock().unwrap();
        Ok(store
            .iter()
            .filter(|c| ids.contains(&c.id))
            .map(|c| (c.id, c.clone()))
            .collect())
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.comments.lock().unwrap().iter().any(|c| c.id == id))
    }

    async fn count(&self, filters: &ExportFilters) -> AppResult<i64> {
        let store = self.comments.lock().unwrap();
        Ok(store.iter().filter(|c| Self::matches(c, filters)).count() as i64)
    }

    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<Comment>> {
        let store = self.comments.lock().unwrap();
        let mut matching: Vec<_> = store
            .iter()
            .filter(|c| Self::matches(c, filters))
            .filter(|c| match cursor {
                Some((created_at, id)) => (c.created_at, c.id) > (created_at, id),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|c| (c.created_at, c.id));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

/// In-memory staging store
///
/// Holds references to the in-memory target stores so the against-existing
/// and FK checks can consult them, the way the SQL statements join against
/// the target relations.
pub struct MemoryStagingStore {
    next_staging_id: AtomicI64,
    users: Mutex<Vec<StagingUser>>,
    articles: Mutex<Vec<StagingArticle>>,
    comments: Mutex<Vec<StagingComment>>,
    user_store: Arc<MemoryUserStore>,
    article_store: Arc<MemoryArticleStore>,
    comment_store: Arc<MemoryCommentStore>,
}

impl MemoryStagingStore {
    pub fn new(
        user_store: Arc<MemoryUserStore>,
        article_store: Arc<MemoryArticleStore>,
        comment_store: Arc<MemoryCommentStore>,
    ) -> Self {
        Self {
            next_staging_id: AtomicI64::new(1),
            users: Mutex::new(Vec::new()),
            articles: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            user_store,
            article_store,
            comment_store,
        }
    }

    fn next_id(&self) -> i64 {
        self.next_staging_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Test helper: remaining staging user rows for a job
    pub fn staged_users(&self, job_id: Uuid) -> Vec<StagingUser> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn create_staging_users(&self, job_id: Uuid, rows: &[StagingUser]) -> AppResult<()> {
        let mut store = self.users.lock().unwrap();
        for row in rows {
            let mut row = row.clone();
            row.staging_id = self.next_id();
            row.job_id = job_id;
            store.push(row);
        }
        Ok(())
    }

    async fn mark_duplicate_users_in_batch(&self, job_id: Uuid) -> AppResult<u64> {
        let mut store = self.users.lock().unwrap();
        let snapshot: Vec<(i64, Option<String>)> = store
            .iter()
            .filter(|r| r.job_id == job_id)
            .map(|r| (r.staging_id, r.email.as_ref().map(|e| e.to_lowercase())))
            .collect();

        let mut marked = 0u64;
        for row in store.iter_mut().filter(|r| r.job_id == job_id) {
            if !row.is_valid {
                continue;
            }
            let Some(email) = row.email.as_ref().map(|e| e.to_lowercase()) else {
                continue;
            };
            let earlier_exists = snapshot
                .iter()
                .any(|(id, e)| *id < row.staging_id && e.as_deref() == Some(email.as_str()));
            if earlier_exists {
                row.is_duplicate = true;
                row.is_valid = false;
                row.validation_error = Some(codes::DUPLICATE_EMAIL.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn mark_duplicate_users_against_existing(&self, job_id: Uuid) -> AppResult<u64> {
        let existing = self.user_store.all();
        let mut store = self.users.lock().unwrap();

        let mut marked = 0u64;
        for row in store.iter_mut().filter(|r| r.job_id == job_id) {
            if !row.is_valid {
                continue;
            }
            let Some(email) = row.email.as_ref().map(|e| e.to_lowercase()) else {
                continue;
            };
            let email_taken = existing.iter().any(|u| u.email.to_lowercase() == email);
            let same_id = row
                .id
                .as_ref()
                .map(|id| existing.iter().any(|u| u.id.to_string() == *id))
                .unwrap_or(false);
            if email_taken && !same_id {
                row.is_duplicate = true;
                row.is_valid = false;
                row.validation_error = Some(codes::DUPLICATE_EMAIL.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn next_valid_users(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingUser>> {
        let store = self.users.lock().unwrap();
        let mut rows: Vec<_> = store
            .iter()
            .filter(|r| {
                r.job_id == job_id
                    && r.is_valid
                    && !r.is_duplicate
                    && !r.processed
                    && r.staging_id > after_staging_id
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.staging_id);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn invalid_users(&self, job_id: Uuid) -> AppResult<Vec<StagingUser>> {
        let store = self.users.lock().unwrap();
        let mut rows: Vec<_> = store
            .iter()
            .filter(|r| r.job_id == job_id && (!r.is_valid || r.is_duplicate))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }

    async fn cleanup_users(&self, job_id: Uuid) -> AppResult<()> {
        self.users.lock().unwrap().retain(|r| r.job_id != job_id);
        Ok(())
    }

    async fn create_staging_articles(
        &self,
        job_id: Uuid,
        rows: &[StagingArticle],
    ) -> AppResult<()> {
        let mut store = self.articles.lock().unwrap();
        for row in rows {
            let mut row = row.clone();
            row.staging_id = self.next_id();
            row.job_id = job_id;
            store.push(row);
        }
        Ok(())
    }

    async fn mark_duplicate_articles_in_batch(&self, job_id: Uuid) -> AppResult<u64> {
        let mut store = self.articles.lock().unwrap();
        let snapshot: Vec<(i64, Option<String>)> = store
            .iter()
            .filter(|r| r.job_id == job_id)
            .map(|r| (r.staging_id, r.slug.as_ref().map(|s| s.to_lowercase())))
            .collect();

        let mut marked = 0u64;
        for row in store.iter_mut().filter(|r| r.job_id == job_id) {
            if !row.is_valid {
                continue;
            }
            let Some(slug) = row.slug.as_ref().map(|s| s.to_lowercase()) else {
                continue;
            };
            let earlier_exists = snapshot
                .iter()
                .any(|(id, s)| *id < row.staging_id && s.as_deref() == Some(slug.as_str()));
            if earlier_exists {
                row.is_duplicate = true;
                row.is_valid = false;
                row.validation_error = Some(codes::DUPLICATE_SLUG.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn mark_duplicate_articles_against_existing(&self, job_id: Uuid) -> AppResult<u64> {
        let existing = self.article_store.all();
        let mut store = self.articles.lock().unwrap();

        let mut marked = 0u64;
        for row in store.iter_mut().filter(|r| r.job_id == job_id) {
            if !row.is_valid {
                continue;
            }
            let Some(slug) = row.slug.as_ref().map(|s| s.to_lowercase()) else {
                continue;
            };
            let slug_taken = existing.iter().any(|a| a.slug.to_lowercase() == slug);
            let same_id = row
                .id
                .as_ref()
                .map(|id| existing.iter().any(|a| a.id.to_string() == *id))
                .unwrap_or(false);
            if slug_taken && !same_id {
                row.is_duplicate = true;
                row.is_valid = false;
                row.validation_error = Some(codes::DUPLICATE_SLUG.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn mark_invalid_author_fk_articles(&self, job_id: Uuid) -> AppResult<u64> {
        let existing = self.user_store.all();
        let mut store = self.articles.lock().unwrap();

        let mut marked = 0u64;
        for row in store.iter_mut().filter(|r| r.job_id == job_id) {
            if !row.is_valid {
                continue;
            }
            let Some(author_id) = row.author_id.as_ref() else {
                continue;
            };
            let author_exists = existing.iter().any(|u| u.id.to_string() == *author_id);
            if !author_exists {
                row.is_valid = false;
                row.validation_error = Some(codes::INVALID_AUTHOR_FK.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn next_valid_articles(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingArticle>> {
        let store = self.articles.lock().unwrap();
        let mut rows: Vec<_> = store
            .iter()
            .filter(|r| {
                r.job_id == job_id
                    && r.is_valid
                    && !r.is_duplicate
                    && !r.processed
                    && r.staging_id > after_staging_id
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.staging_id);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn invalid_articles(&self, job_id: Uuid) -> AppResult<Vec<StagingArticle>> {
        let store = self.articles.lock().unwrap();
        let mut rows: Vec<_> = store
            .iter()
            .filter(|r| r.job_id == job_id && (!r.is_valid || r.is_duplicate))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }

    async fn cleanup_articles(&self, job_id: Uuid) -> AppResult<()> {
        self.articles.lock().unwrap().retain(|r| r.job_id != job_id);
        Ok(())
    }

    async fn create_staging_comments(
        &self,
        job_id: Uuid,
        rows: &[StagingComment],
    ) -> AppResult<()> {
        let mut store = self.comments.lock().unwrap();
        for row in rows {
            let mut row = row.clone();
            row.staging_id = self.next_id();
            row.job_id = job_id;
            store.push(row);
        }
        Ok(())
    }

    async fn mark_duplicate_comments_in_batch(&self, job_id: Uuid) -> AppResult<u64> {
        let mut store = self.comments.lock().unwrap();
        let snapshot: Vec<(i64, Option<String>)> = store
            .iter()
            .filter(|r| r.job_id == job_id)
            .map(|r| (r.staging_id, r.id.clone()))
            .collect();

        let mut marked = 0u64;
        for row in store.iter_mut().filter(|r| r.job_id == job_id) {
            if !row.is_valid {
                continue;
            }
            let Some(id) = row.id.as_ref() else {
                continue;
            };
            let earlier_exists = snapshot
                .iter()
                .any(|(sid, other)| *sid < row.staging_id && other.as_deref() == Some(id));
            if earlier_exists {
                row.is_duplicate = true;
                row.is_valid = false;
                row.validation_error = Some(codes::DUPLICATE_ID.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn mark_invalid_fk_comments(&self, job_id: Uuid) -> AppResult<u64> {
        let articles = self.article_store.all();
        let users = self.user_store.all();
        let mut store = self.comments.lock().unwrap();

        let mut marked = 0u64;
        for row in store.iter_mut().filter(|r| r.job_id == job_id) {
            if !row.is_valid {
                continue;
            }
            let article_missing = row
                .article_id
                .as_ref()
                .map(|id| !articles.iter().any(|a| a.id.to_string() == *id))
                .unwrap_or(false);
            let user_missing = row
                .user_id
                .as_ref()
                .map(|id| !users.iter().any(|u| u.id.to_string() == *id))
                .unwrap_or(false);

            if article_missing {
                row.is_valid = false;
                row.validation_error = Some(codes::INVALID_ARTICLE_FK.to_string());
                marked += 1;
            } else if user_missing {
                row.is_valid = false;
                row.validation_error = Some(codes::INVALID_USER_FK.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn next_valid_comments(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingComment>> {
        let store = self.comments.lock().unwrap();
        let mut rows: Vec<_> = store
            .iter()
            .filter(|r| {
                r.job_id == job_id
                    && r.is_valid
                    && !r.is_duplicate
                    && !r.processed
                    && r.staging_id > after_staging_id
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.staging_id);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn invalid_comments(&self, job_id: Uuid) -> AppResult<Vec<StagingComment>> {
        let store = self.comments.lock().unwrap();
        let mut rows: Vec<_> = store
            .iter()
            .filter(|r| r.job_id == job_id && (!r.is_valid || r.is_duplicate))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }

    async fn cleanup_comments(&self, job_id: Uuid) -> AppResult<()> {
        self.comments.lock().unwrap().retain(|r| r.job_id != job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged_user(row: i64, email: &str, valid: bool) -> StagingUser {
        StagingUser {
            row_number: row,
            email: Some(email.to_string()),
            is_valid: valid,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_occurrence_wins() {
        let users = Arc::new(MemoryUserStore::new());
        let articles = Arc::new(MemoryArticleStore::new());
        let comments = Arc::new(MemoryCommentStore::new());
        let staging = MemoryStagingStore::new(users, articles, comments);

        let job_id = Uuid::new_v4();
        staging
            .create_staging_users(
                job_id,
                &[
                    staged_user(2, "dup@example.com", true),
                    staged_user(3, "other@example.com", true),
                    staged_user(4, "DUP@example.com", true),
                ],
            )
            .await
            .unwrap();

        let marked = staging.mark_duplicate_users_in_batch(job_id).await.unwrap();
        assert_eq!(marked, 1);

        let survivors = staging.next_valid_users(job_id, 0, 100).await.unwrap();
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].email.as_deref(), Some("dup@example.com"));

        let invalid = staging.invalid_users(job_id).await.unwrap();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].row_number, 4);
        assert_eq!(invalid[0].validation_error.as_deref(), Some("DUPLICATE_EMAIL"));
    }

    #[tokio::test]
    async fn test_duplicate_against_existing_skips_same_id() {
        let users = Arc::new(MemoryUserStore::new());
        let articles = Arc::new(MemoryArticleStore::new());
        let comments = Arc::new(MemoryCommentStore::new());

        let existing_id = Uuid::new_v4();
        users
            .batch_upsert(&[User {
                id: existing_id,
                email: "taken@example.com".into(),
                name: "Existing".into(),
                role: "reader".into(),
                active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }])
            .await
            .unwrap();

        let staging = MemoryStagingStore::new(users, articles, comments);
        let job_id = Uuid::new_v4();

        let mut update_row = staged_user(2, "taken@example.com", true);
        update_row.id = Some(existing_id.to_string());
        let conflict_row = staged_user(3, "taken@example.com", true);

        staging
            .create_staging_users(job_id, &[update_row, conflict_row])
            .await
            .unwrap();

        let marked = staging
            .mark_duplicate_users_against_existing(job_id)
            .await
            .unwrap();
        // The row carrying the existing id is an update, not a duplicate
        assert_eq!(marked, 1);
    }

    #[tokio::test]
    async fn test_keyset_cursor_pages_in_order() {
        let users = Arc::new(MemoryUserStore::new());
        let articles = Arc::new(MemoryArticleStore::new());
        let comments = Arc::new(MemoryCommentStore::new());
        let staging = MemoryStagingStore::new(users, articles, comments);

        let job_id = Uuid::new_v4();
        let rows: Vec<StagingUser> = (0..5)
            .map(|i| staged_user(i + 2, &format!("u{i}@example.com"), true))
            .collect();
        staging.create_staging_users(job_id, &rows).await.unwrap();

        let first = staging.next_valid_users(job_id, 0, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = staging
            .next_valid_users(job_id, first.last().unwrap().staging_id, 2)
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].staging_id > first[1].staging_id);
    }
}
