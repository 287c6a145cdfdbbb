//! Per-resource import orchestrator
//!
//! One invocation per job. Phases run strictly in sequence:
//!
//! 1. parse + validate + stage (batched inserts, progress at every flush)
//! 2. bulk duplicate and foreign-key checks (set-based SQL over staging)
//! 3. promote surviving rows to the target relation via batch upsert
//! 4. journal errors, clean up staging, finalize counters
//!
//! Per-row errors never fail the job; bulk SQL errors do. The cancellation
//! token is observed between phases and between batches; a database call is
//! never interrupted mid-statement.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::validation::{self, staging_verdict, RowError};
use super::{open_file_reader, FileFormat};
use crate::error::codes;
use crate::error::{AppError, AppResult};
use crate::models::{Job, JobError, ResourceType};
use crate::repos::{
    ArticleStore, CommentStore, JobStore, StagingArticle, StagingComment, StagingStore,
    StagingUser, UserStore,
};

/// How a pipeline invocation ended
enum Outcome {
    Finished { total: i64, inserted: i64 },
    Cancelled,
}

/// The staged import pipeline
pub struct ImportPipeline {
    jobs: Arc<dyn JobStore>,
    staging: Arc<dyn StagingStore>,
    users: Arc<dyn UserStore>,
    articles: Arc<dyn ArticleStore>,
    comments: Arc<dyn CommentStore>,
    batch_size: usize,
}

impl ImportPipeline {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        staging: Arc<dyn StagingStore>,
        users: Arc<dyn UserStore>,
        articles: Arc<dyn ArticleStore>,
        comments: Arc<dyn CommentStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            jobs,
            staging,
            users,
            articles,
            comments,
            batch_size,
        }
    }

    /// Process one import job to completion, failure, or cancellation
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> AppResult<()> {
        info!(job_id = %job.id, resource = %job.resource, "Starting import job");
        let started = std::time::Instant::now();

        self.jobs.set_started(job.id).await?;

        let format = job
            .file_format
            .as_deref()
            .and_then(FileFormat::parse)
            .unwrap_or_else(|| FileFormat::detect(job.file_path.as_deref().unwrap_or_default()));

        let result = match job.resource {
            ResourceType::Users => self.import_users(job, format, cancel).await,
            ResourceType::Articles => self.import_articles(job, format, cancel).await,
            ResourceType::Comments => self.import_comments(job, format, cancel).await,
        };

        match result {
            Ok(Outcome::Finished { total, inserted }) => {
                self.jobs
                    .set_completed(job.id, inserted, total - inserted)
                    .await?;
                info!(
                    job_id = %job.id,
                    total,
                    successful = inserted,
                    failed = total - inserted,
                    duration_secs = started.elapsed().as_secs_f64(),
                    "Import job completed"
                );
                Ok(())
            }
            Ok(Outcome::Cancelled) => {
                self.jobs.set_cancelled(job.id, "cancelled").await?;
                info!(job_id = %job.id, "Import job cancelled");
                Ok(())
            }
            Err(e) => {
                // Staging rows survive for post-mortem inspection
                let message = e.to_string();
                if let Err(update_err) = self.jobs.set_failed(job.id, &message).await {
                    warn!(job_id = %job.id, error = %update_err, "Failed to mark job failed");
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Users
    // ========================================================================

    async fn import_users(
        &self,
        job: &Job,
        format: FileFormat,
        cancel: &CancellationToken,
    ) -> AppResult<Outcome> {
        let file_path = job
            .file_path
            .clone()
            .ok_or_else(|| AppError::Validation("import job has no file".to_string()))?;
        let mut reader = open_file_reader(&file_path, format).await?;

        // Phase 1: parse, validate, stage
        let mut batch: Vec<StagingUser> = Vec::with_capacity(self.batch_size);
        let mut journal: Vec<JobError> = Vec::new();
        let (mut total, mut valid, mut invalid) = (0i64, 0i64, 0i64);

        while let Some(parsed) = reader
            .next_record::<crate::ingest::records::UserRecord>()
            .await?
        {
            total += 1;
            let staged = match parsed.record {
                None => {
                    invalid += 1;
                    journal.push(parse_error(job, parsed.row_number, parsed.raw));
                    StagingUser {
                        row_number: parsed.row_number,
                        validation_error: Some(parse_error_verdict()),
                        ..Default::default()
                    }
                }
                Some(record) => {
                    let errors = validation::user::validate(parsed.row_number, &record);
                    let verdict = staging_verdict(&errors);
                    if errors.is_empty() {
                        valid += 1;
                    } else {
                        invalid += 1;
                        journal.extend(errors.iter().map(|e| row_error_to_job_error(job, e)));
                    }
                    validation::user::to_staging(parsed.row_number, &record, verdict)
                }
            };

            batch.push(staged);
            if batch.len() >= self.batch_size {
                self.staging.create_staging_users(job.id, &batch).await?;
                batch.clear();
                self.jobs
                    .update_progress(job.id, total, valid, invalid)
                    .await?;
                if cancel.is_cancelled() {
                    return Ok(Outcome::Cancelled);
                }
            }
        }

        if !batch.is_empty() {
            self.staging.create_staging_users(job.id, &batch).await?;
        }
        self.jobs.set_total_records(job.id, total).await?;
        self.jobs
            .update_progress(job.id, total, valid, invalid)
            .await?;

        info!(
            job_id = %job.id,
            total_rows = total,
            initial_valid = valid,
            initial_invalid = invalid,
            "First pass complete, checking duplicates"
        );

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Phase 2: bulk checks
        let dup_in_batch = self.staging.mark_duplicate_users_in_batch(job.id).await?;
        let dup_existing = self
            .staging
            .mark_duplicate_users_against_existing(job.id)
            .await?;

        let marked = (dup_in_batch + dup_existing) as i64;
        valid -= marked;
        invalid += marked;
        self.jobs
            .update_progress(job.id, total, valid, invalid)
            .await?;

        info!(
            job_id = %job.id,
            duplicates_in_batch = dup_in_batch,
            duplicates_existing = dup_existing,
            "Duplicate check complete"
        );

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Phase 3: promote survivors
        let mut inserted = 0i64;
        let mut after = 0i64;
        loop {
            let rows = self
                .staging
                .next_valid_users(job.id, after, self.batch_size as i64)
                .await?;
            let Some(last) = rows.last() else {
                break;
            };
            after = last.staging_id;

            let mut entities = Vec::with_capacity(rows.len());
            for row in &rows {
                match validation::user::from_staging(row) {
                    Ok(user) => entities.push(user),
                    Err(e) => {
                        warn!(row = row.row_number, error = %e, "Skipping unconvertible staging user")
                    }
                }
            }

            if !entities.is_empty() {
                inserted += self.users.batch_upsert(&entities).await? as i64;
            }

            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        // Phase 4: journal, cleanup, finalize
        for row in self.staging.invalid_users(job.id).await? {
            if let Some(e) = relational_error(job, row.row_number, &row.validation_error, row.email.clone()) {
                journal.push(e);
            }
        }
        self.record_errors(&journal).await?;
        self.staging.cleanup_users(job.id).await?;
        self.jobs
            .update_progress(job.id, total, inserted, total - inserted)
            .await?;

        Ok(Outcome::Finished { total, inserted })
    }

    // ========================================================================
    // Articles
    // ========================================================================

    async fn import_articles(
        &self,
        job: &Job,
        format: FileFormat,
        cancel: &CancellationToken,
    ) -> AppResult<Outcome> {
        let file_path = job
            .file_path
            .clone()
            .ok_or_else(|| AppError::Validation("import job has no file".to_string()))?;
        let mut reader = open_file_reader(&file_path, format).await?;

        let mut batch: Vec<StagingArticle> = Vec::with_capacity(self.batch_size);
        let mut journal: Vec<JobError> = Vec::new();
        let (mut total, mut valid, mut invalid) = (0i64, 0i64, 0i64);

        while let Some(parsed) = reader
            .next_record::<crate::ingest::records::ArticleRecord>()
            .await?
        {
            total += 1;
            let staged = match parsed.record {
                None => {
                    invalid += 1;
                    journal.push(parse_error(job, parsed.row_number, parsed.raw));
                    StagingArticle {
                        row_number: parsed.row_number,
                        validation_error: Some(parse_error_verdict()),
                        ..Default::default()
                    }
                }
                Some(record) => {
                    let errors = validation::article::validate(parsed.row_number, &record);
                    let verdict = staging_verdict(&errors);
                    if errors.is_empty() {
                        valid += 1;
                    } else {
                        invalid += 1;
                        journal.extend(errors.iter().map(|e| row_error_to_job_error(job, e)));
                    }
                    validation::article::to_staging(parsed.row_number, &record, verdict)
                }
            };

            batch.push(staged);
            if batch.len() >= self.batch_size {
                self.staging.create_staging_articles(job.id, &batch).await?;
                batch.clear();
                self.jobs
                    .update_progress(job.id, total, valid, invalid)
                    .await?;
                if cancel.is_cancelled() {
                    return Ok(Outcome::Cancelled);
                }
            }
        }

        if !batch.is_empty() {
            self.staging.create_staging_articles(job.id, &batch).await?;
        }
        self.jobs.set_total_records(job.id, total).await?;
        self.jobs
            .update_progress(job.id, total, valid, invalid)
            .await?;

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Phase 2: duplicates, then author FK
        let dup_in_batch = self
            .staging
            .mark_duplicate_articles_in_batch(job.id)
            .await?;
        let dup_existing = self
            .staging
            .mark_duplicate_articles_against_existing(job.id)
            .await?;
        let invalid_fks = self.staging.mark_invalid_author_fk_articles(job.id).await?;

        let marked = (dup_in_batch + dup_existing + invalid_fks) as i64;
        valid -= marked;
        invalid += marked;
        self.jobs
            .update_progress(job.id, total, valid, invalid)
            .await?;

        info!(
            job_id = %job.id,
            total_rows = total,
            duplicates_in_batch = dup_in_batch,
            duplicates_existing = dup_existing,
            invalid_author_fks = invalid_fks,
            "Validation and deduplication complete"
        );

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Phase 3
        let mut inserted = 0i64;
        let mut after = 0i64;
        loop {
            let rows = self
                .staging
                .next_valid_articles(job.id, after, self.batch_size as i64)
                .await?;
            let Some(last) = rows.last() else {
                break;
            };
            after = last.staging_id;

            let mut entities = Vec::with_capacity(rows.len());
            for row in &rows {
                match validation::article::from_staging(row) {
                    Ok(article) => entities.push(article),
                    Err(e) => {
                        warn!(row = row.row_number, error = %e, "Skipping unconvertible staging article")
                    }
                }
            }

            if !entities.is_empty() {
                inserted += self.articles.batch_upsert(&entities).await? as i64;
            }

            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        // Phase 4
        for row in self.staging.invalid_articles(job.id).await? {
            if let Some(e) = relational_error(job, row.row_number, &row.validation_error, row.slug.clone()) {
                journal.push(e);
            }
        }
        self.record_errors(&journal).await?;
        self.staging.cleanup_articles(job.id).await?;
        self.jobs
            .update_progress(job.id, total, inserted, total - inserted)
            .await?;

        Ok(Outcome::Finished { total, inserted })
    }

    // ========================================================================
    // Comments
    // ========================================================================

    async fn import_comments(
        &self,
        job: &Job,
        format: FileFormat,
        cancel: &CancellationToken,
    ) -> AppResult<Outcome> {
        let file_path = job
            .file_path
            .clone()
            .ok_or_else(|| AppError::Validation("import job has no file".to_string()))?;
        let mut reader = open_file_reader(&file_path, format).await?;

        let mut batch: Vec<StagingComment> = Vec::with_capacity(self.batch_size);
        let mut journal: Vec<JobError> = Vec::new();
        let (mut total, mut valid, mut invalid) = (0i64, 0i64, 0i64);

        while let Some(parsed) = reader
            .next_record::<crate::ingest::records::CommentRecord>()
            .await?
        {
            total += 1;
            let staged = match parsed.record {
                None => {
                    invalid += 1;
                    journal.push(parse_error(job, parsed.row_number, parsed.raw));
                    StagingComment {
                        row_number: parsed.row_number,
                        validation_error: Some(parse_error_verdict()),
                        ..Default::default()
                    }
                }
                Some(record) => {
                    let errors = validation::comment::validate(parsed.row_number, &record);
                    let verdict = staging_verdict(&errors);
                    if errors.is_empty() {
                        valid += 1;
                    } else {
                        invalid += 1;
                        journal.extend(errors.iter().map(|e| row_error_to_job_error(job, e)));
                    }
                    validation::comment::to_staging(parsed.row_number, &record, verdict)
                }
            };

            batch.push(staged);
            if batch.len() >= self.batch_size {
                self.staging.create_staging_comments(job.id, &batch).await?;
                batch.clear();
                self.jobs
                    .update_progress(job.id, total, valid, invalid)
                    .await?;
                if cancel.is_cancelled() {
                    return Ok(Outcome::Cancelled);
                }
            }
        }

        if !batch.is_empty() {
            self.staging.create_staging_comments(job.id, &batch).await?;
        }
        self.jobs.set_total_records(job.id, total).await?;
        self.jobs
            .update_progress(job.id, total, valid, invalid)
            .await?;

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Phase 2: duplicate ids, then article/user FKs
        let dup_in_batch = self
            .staging
            .mark_duplicate_comments_in_batch(job.id)
            .await?;
        let invalid_fks = self.staging.mark_invalid_fk_comments(job.id).await?;

        let marked = (dup_in_batch + invalid_fks) as i64;
        valid -= marked;
        invalid += marked;
        self.jobs
            .update_progress(job.id, total, valid, invalid)
            .await?;

        info!(
            job_id = %job.id,
            total_rows = total,
            duplicates_in_batch = dup_in_batch,
            invalid_fks,
            "Validation and deduplication complete"
        );

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Phase 3
        let mut inserted = 0i64;
        let mut after = 0i64;
        loop {
            let rows = self
                .staging
                .next_valid_comments(job.id, after, self.batch_size as i64)
                .await?;
            let Some(last) = rows.last() else {
                break;
            };
            after = last.staging_id;

            let mut entities = Vec::with_capacity(rows.len());
            for row in &rows {
                match validation::comment::from_staging(row) {
                    Ok(comment) => entities.push(comment),
                    Err(e) => {
                        warn!(row = row.row_number, error = %e, "Skipping unconvertible staging comment")
                    }
                }
            }

            if !entities.is_empty() {
                inserted += self.comments.batch_upsert(&entities).await? as i64;
            }

            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        // Phase 4
        for row in self.staging.invalid_comments(job.id).await? {
            if let Some(e) = relational_error(job, row.row_number, &row.validation_error, row.id.clone()) {
                journal.push(e);
            }
        }
        self.record_errors(&journal).await?;
        self.staging.cleanup_comments(job.id).await?;
        self.jobs
            .update_progress(job.id, total, inserted, total - inserted)
            .await?;

        Ok(Outcome::Finished { total, inserted })
    }

    /// Append journal entries in pages of the batch size
    async fn record_errors(&self, errors: &[JobError]) -> AppResult<()> {
        for chunk in errors.chunks(self.batch_size) {
            self.jobs.add_errors(chunk).await?;
        }
        Ok(())
    }
}

fn parse_error_verdict() -> String {
    format!("{}: Invalid record format", codes::FILE_PARSE_ERROR)
}

fn parse_error(job: &Job, row_number: i64, raw: Option<String>) -> JobError {
    let mut error = JobError::new(
        job.id,
        row_number,
        None,
        None,
        codes::FILE_PARSE_ERROR,
        "Invalid record format",
    );
    error.raw_data = raw;
    error
}

fn row_error_to_job_error(job: &Job, e: &RowError) -> JobError {
    JobError::new(
        job.id,
        e.row_number,
        (!e.record_identifier.is_empty()).then(|| e.record_identifier.clone()),
        Some(e.field.to_string()),
        e.code,
        e.message,
    )
}

/// Build a journal entry for a pass-2 relational verdict, if the staging
/// row carries one. Pass-1 verdicts are already journaled with full field
/// detail and are skipped here.
fn relational_error(
    job: &Job,
    row_number: i64,
    verdict: &Option<String>,
    identifier: Option<String>,
) -> Option<JobError> {
    let verdict = verdict.as_deref()?;
    let code = verdict.split(':').next().unwrap_or(verdict).trim();

    let message = match code {
        codes::DUPLICATE_EMAIL => "Duplicate email",
        codes::DUPLICATE_SLUG => "Duplicate slug",
        codes::DUPLICATE_ID => "Duplicate id",
        codes::INVALID_AUTHOR_FK => "Author does not exist",
        codes::INVALID_ARTICLE_FK => "Article does not exist",
        codes::INVALID_USER_FK => "User does not exist",
        codes::FK_VIOLATION => "Foreign key violation",
        _ => return None,
    };

    Some(JobError::new(
        job.id,
        row_number,
        identifier,
        None,
        code.to_string(),
        message,
    ))
}
