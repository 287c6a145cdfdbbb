//! Job persistence and the error journal

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use super::{rows_per_chunk, JobStore};
use crate::error::AppResult;
use crate::models::{Job, JobError};

/// PostgreSQL-backed job store
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, kind, resource, status, idempotency_key, file_path, file_url, \
     file_format, total_records, processed_records, successful_records, failed_records, \
     error_message, started_at, completed_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    resource: String,
    status: String,
    idempotency_key: Option<String>,
    file_path: Option<String>,
    file_url: Option<String>,
    file_format: Option<String>,
    total_records: i64,
    processed_records: i64,
    successful_records: i64,
    failed_records: i64,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind.into(),
            resource: row.resource.into(),
            status: row.status.into(),
            idempotency_key: row.idempotency_key,
            file_path: row.file_path,
            file_url: row.file_url,
            file_format: row.file_format,
            total_records: row.total_records,
            processed_records: row.processed_records,
            successful_records: row.successful_records,
            failed_records: row.failed_records,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        sqlx::query(&sql)
            .bind(job.id)
            .bind(job.kind.as_str())
            .bind(job.resource.as_str())
            .bind(job.status.as_str())
            .bind(&job.idempotency_key)
            .bind(&job.file_path)
            .bind(&job.file_url)
            .bind(&job.file_format)
            .bind(job.total_records)
            .bind(job.processed_records)
            .bind(job.successful_records)
            .bind(job.failed_records)
            .bind(&job.error_message)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Job::from))
    }

    async fn set_started(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'processing', started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_completed(&self, id: Uuid, successful: i64, failed: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', successful_records = $2, \
             failed_records = $3, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(successful)
        .bind(failed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_failed(&self, id: Uuid, error_message: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = $2, \
             completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_cancelled(&self, id: Uuid, message: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', error_message = $2, \
             completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_total_records(&self, id: Uuid, total: i64) -> AppResult<()> {
        sqlx::query("UPDATE jobs SET total_records = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(total)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        processed: i64,
        successful: i64,
        failed: i64,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET processed_records = $2, successful_records = $3, \
             failed_records = $4, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(processed)
        .bind(successful)
        .bind(failed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_file_path(&self, id: Uuid, file_path: &str) -> AppResult<()> {
        sqlx::query("UPDATE jobs SET file_path = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(file_path)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_errors(&self, errors: &[JobError]) -> AppResult<()> {
        if errors.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in errors.chunks(rows_per_chunk(9)) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO job_errors (id, job_id, row_number, record_identifier, \
                 field_name, error_code, error_message, raw_data, created_at) ",
            );

            builder.push_values(chunk, |mut b, e| {
                b.push_bind(e.id)
                    .push_bind(e.job_id)
                    .push_bind(e.row_number)
                    .push_bind(&e.record_identifier)
                    .push_bind(&e.field_name)
                    .push_bind(&e.error_code)
                    .push_bind(&e.error_message)
                    .push_bind(&e.raw_data)
                    .push_bind(e.created_at);
            });

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

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
        let offset = (page - 1) * per_page;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_errors WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        let errors = sqlx::query_as::<_, JobError>(
            "SELECT id, job_id, row_number, record_identifier, field_name, error_code, \
             error_message, raw_data, created_at \
             FROM job_errors WHERE job_id = $1 \
             ORDER BY row_number ASC LIMIT $2 OFFSET $3",
        )
        .bind(job_id)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((errors, total))
    }

    async fn counts_by_status(&self) -> AppResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows)
    }
}
