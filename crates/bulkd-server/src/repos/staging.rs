//! Per-job staging relation operations
//!
//! Deduplication and FK validation are single set-based UPDATE statements
//! over the staging relations; "earlier staging_id wins" gives deterministic
//! first-occurrence-wins semantics because staging_id is monotone in row
//! arrival order.

use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use super::{rows_per_chunk, StagingArticle, StagingComment, StagingStore, StagingUser};
use crate::error::AppResult;
use crate::error::codes;

/// PostgreSQL-backed staging store
#[derive(Clone)]
pub struct PgStagingStore {
    pool: PgPool,
}

impl PgStagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const STAGING_USER_COLUMNS: &str = "staging_id, job_id, row_number, id, email, name, role, \
     active, created_at, updated_at, validation_error, is_valid, is_duplicate, processed";

const STAGING_ARTICLE_COLUMNS: &str = "staging_id, job_id, row_number, id, slug, title, body, \
     author_id, tags, published_at, status, validation_error, is_valid, is_duplicate, processed";

const STAGING_COMMENT_COLUMNS: &str = "staging_id, job_id, row_number, id, article_id, user_id, \
     body, created_at, validation_error, is_valid, is_duplicate, processed";

#[async_trait]
impl StagingStore for PgStagingStore {
    // ========================================================================
    // Users
    // ========================================================================

    async fn create_staging_users(&self, job_id: Uuid, rows: &[StagingUser]) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(rows_per_chunk(11)) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO staging_users (job_id, row_number, id, email, name, role, \
                 active, created_at, updated_at, validation_error, is_valid) ",
            );

            builder.push_values(chunk, |mut b, row| {
                b.push_bind(job_id)
                    .push_bind(row.row_number)
                    .push_bind(&row.id)
                    .push_bind(&row.email)
                    .push_bind(&row.name)
                    .push_bind(&row.role)
                    .push_bind(row.active)
                    .push_bind(&row.created_at)
                    .push_bind(&row.updated_at)
                    .push_bind(&row.validation_error)
                    .push_bind(row.is_valid);
            });

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn mark_duplicate_users_in_batch(&self, job_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE staging_users s1 \
             SET is_duplicate = true, validation_error = $2, is_valid = false \
             WHERE s1.job_id = $1 \
             AND s1.is_valid = true \
             AND s1.email IS NOT NULL \
             AND EXISTS ( \
                 SELECT 1 FROM staging_users s2 \
                 WHERE s2.job_id = s1.job_id \
                 AND LOWER(s2.email) = LOWER(s1.email) \
                 AND s2.staging_id < s1.staging_id \
             )",
        )
        .bind(job_id)
        .bind(codes::DUPLICATE_EMAIL)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_duplicate_users_against_existing(&self, job_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE staging_users s \
             SET is_duplicate = true, validation_error = $2, is_valid = false \
             WHERE s.job_id = $1 \
             AND s.is_valid = true \
             AND EXISTS (SELECT 1 FROM users u WHERE LOWER(u.email) = LOWER(s.email)) \
             AND (s.id IS NULL OR NOT EXISTS (SELECT 1 FROM users u2 WHERE u2.id::text = s.id))",
        )
        .bind(job_id)
        .bind(codes::DUPLICATE_EMAIL)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn next_valid_users(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingUser>> {
        let sql = format!(
            "SELECT {STAGING_USER_COLUMNS} FROM staging_users \
             WHERE job_id = $1 AND is_valid = true AND is_duplicate = false \
             AND processed = false AND staging_id > $2 \
             ORDER BY staging_id ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, StagingUser>(&sql)
            .bind(job_id)
            .bind(after_staging_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn invalid_users(&self, job_id: Uuid) -> AppResult<Vec<StagingUser>> {
        let sql = format!(
            "SELECT {STAGING_USER_COLUMNS} FROM staging_users \
             WHERE job_id = $1 AND (is_valid = false OR is_duplicate = true) \
             ORDER BY row_number ASC"
        );
        let rows = sqlx::query_as::<_, StagingUser>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn cleanup_users(&self, job_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM staging_users WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Articles
    // ========================================================================

    async fn create_staging_articles(
        &self,
        job_id: Uuid,
        rows: &[StagingArticle],
    ) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(rows_per_chunk(12)) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO staging_articles (job_id, row_number, id, slug, title, body, \
                 author_id, tags, published_at, status, validation_error, is_valid) ",
            );

            builder.push_values(chunk, |mut b, row| {
                b.push_bind(job_id)
                    .push_bind(row.row_number)
                    .push_bind(&row.id)
                    .push_bind(&row.slug)
                    .push_bind(&row.title)
                    .push_bind(&row.body)
                    .push_bind(&row.author_id)
                    .push_bind(&row.tags)
                    .push_bind(&row.published_at)
                    .push_bind(&row.status)
                    .push_bind(&row.validation_error)
                    .push_bind(row.is_valid);
            });

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn mark_duplicate_articles_in_batch(&self, job_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE staging_articles s1 \
             SET is_duplicate = true, validation_error = $2, is_valid = false \
             WHERE s1.job_id = $1 \
             AND s1.is_valid = true \
             AND s1.slug IS NOT NULL \
             AND EXISTS ( \
                 SELECT 1 FROM staging_articles s2 \
                 WHERE s2.job_id = s1.job_id \
                 AND LOWER(s2.slug) = LOWER(s1.slug) \
                 AND s2.staging_id < s1.staging_id \
             )",
        )
        .bind(job_id)
        .bind(codes::DUPLICATE_SLUG)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_duplicate_articles_against_existing(&self, job_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE staging_articles s \
             SET is_duplicate = true, validation_error = $2, is_valid = false \
             WHERE s.job_id = $1 \
             AND s.is_valid = true \
             AND EXISTS (SELECT 1 FROM articles a WHERE LOWER(a.slug) = LOWER(s.slug)) \
             AND (s.id IS NULL OR NOT EXISTS (SELECT 1 FROM articles a2 WHERE a2.id::text = s.id))",
        )
        .bind(job_id)
        .bind(codes::DUPLICATE_SLUG)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_invalid_author_fk_articles(&self, job_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE staging_articles s \
             SET is_valid = false, validation_error = $2 \
             WHERE s.job_id = $1 \
             AND s.is_valid = true \
             AND s.author_id IS NOT NULL \
             AND NOT EXISTS (SELECT 1 FROM users u WHERE u.id::text = s.author_id)",
        )
        .bind(job_id)
        .bind(codes::INVALID_AUTHOR_FK)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn next_valid_articles(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingArticle>> {
        let sql = format!(
            "SELECT {STAGING_ARTICLE_COLUMNS} FROM staging_articles \
             WHERE job_id = $1 AND is_valid = true AND is_duplicate = false \
             AND processed = false AND staging_id > $2 \
             ORDER BY staging_id ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, StagingArticle>(&sql)
            .bind(job_id)
            .bind(after_staging_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn invalid_articles(&self, job_id: Uuid) -> AppResult<Vec<StagingArticle>> {
        let sql = format!(
            "SELECT {STAGING_ARTICLE_COLUMNS} FROM staging_articles \
             WHERE job_id = $1 AND (is_valid = false OR is_duplicate = true) \
             ORDER BY row_number ASC"
        );
        let rows = sqlx::query_as::<_, StagingArticle>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn cleanup_articles(&self, job_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM staging_articles WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Comments
    // ========================================================================

    async fn create_staging_comments(
        &self,
        job_id: Uuid,
        rows: &[StagingComment],
    ) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(rows_per_chunk(9)) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO staging_comments (job_id, row_number, id, article_id, user_id, \
                 body, created_at, validation_error, is_valid) ",
            );

            builder.push_values(chunk, |mut b, row| {
                b.push_bind(job_id)
                    .push_bind(row.row_number)
                    .push_bind(&row.id)
                    .push_bind(&row.article_id)
                    .push_bind(&row.user_id)
                    .push_bind(&row.body)
                    .push_bind(&row.created_at)
                    .push_bind(&row.validation_error)
                    .push_bind(row.is_valid);
            });

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn mark_duplicate_comments_in_batch(&self, job_id: Uuid) -> AppResult<u64> {
        // Comments deduplicate on client-supplied id only
        let result = sqlx::query(
            "UPDATE staging_comments s1 \
             SET is_duplicate = true, validation_error = $2, is_valid = false \
             WHERE s1.job_id = $1 \
             AND s1.is_valid = true \
             AND s1.id IS NOT NULL \
             AND EXISTS ( \
                 SELECT 1 FROM staging_comments s2 \
                 WHERE s2.job_id = s1.job_id \
                 AND s2.id = s1.id \
                 AND s2.staging_id < s1.staging_id \
             )",
        )
        .bind(job_id)
        .bind(codes::DUPLICATE_ID)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_invalid_fk_comments(&self, job_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE staging_comments s \
             SET is_valid = false, \
                 validation_error = CASE \
                     WHEN s.article_id IS NOT NULL AND NOT EXISTS \
                         (SELECT 1 FROM articles a WHERE a.id::text = s.article_id) THEN $2 \
                     WHEN s.user_id IS NOT NULL AND NOT EXISTS \
                         (SELECT 1 FROM users u WHERE u.id::text = s.user_id) THEN $3 \
                     ELSE $4 \
                 END \
             WHERE s.job_id = $1 \
             AND s.is_valid = true \
             AND ( \
                 (s.article_id IS NOT NULL AND NOT EXISTS \
                     (SELECT 1 FROM articles a WHERE a.id::text = s.article_id)) \
                 OR (s.user_id IS NOT NULL AND NOT EXISTS \
                     (SELECT 1 FROM users u WHERE u.id::text = s.user_id)) \
             )",
        )
        .bind(job_id)
        .bind(codes::INVALID_ARTICLE_FK)
        .bind(codes::INVALID_USER_FK)
        .bind(codes::FK_VIOLATION)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn next_valid_comments(
        &self,
        job_id: Uuid,
        after_staging_id: i64,
        limit: i64,
    ) -> AppResult<Vec<StagingComment>> {
        let sql = format!(
            "SELECT {STAGING_COMMENT_COLUMNS} FROM staging_comments \
             WHERE job_id = $1 AND is_valid = true AND is_duplicate = false \
             AND processed = false AND staging_id > $2 \
             ORDER BY staging_id ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, StagingComment>(&sql)
            .bind(job_id)
            .bind(after_staging_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn invalid_comments(&self, job_id: Uuid) -> AppResult<Vec<StagingComment>> {
        let sql = format!(
            "SELECT {STAGING_COMMENT_COLUMNS} FROM staging_comments \
             WHERE job_id = $1 AND (is_valid = false OR is_duplicate = true) \
             ORDER BY row_number ASC"
        );
        let rows = sqlx::query_as::<_, StagingComment>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn cleanup_comments(&self, job_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM staging_comments WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
