//! Idempotency key persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::IdempotencyStore;
use crate::error::AppResult;

/// PostgreSQL-backed idempotency key store
#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn put(&self, key: &str, job_id: Uuid, expires_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO idempotency_keys (idempotency_key, job_id, created_at, expires_at) \
             VALUES ($1, $2, NOW(), $3)",
        )
        .bind(key)
        .bind(job_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_live(&self, key: &str) -> AppResult<Option<Uuid>> {
        let job_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT job_id FROM idempotency_keys \
             WHERE idempotency_key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job_id)
    }

    async fn delete_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
