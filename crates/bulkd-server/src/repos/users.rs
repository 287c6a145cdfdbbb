//! User target-relation repository

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::{rows_per_chunk, PageCursor, UserStore};
use crate::error::AppResult;
use crate::models::{ExportFilters, User};

/// PostgreSQL-backed user store
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &ExportFilters) {
        if let Some(role) = &filters.role {
            builder.push(" AND role = ").push_bind(role.clone());
        }
        if let Some(active) = filters.active {
            builder.push(" AND active = ").push_bind(active);
        }
        if let Some(after) = filters.created_after {
            builder.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filters.created_before {
            builder.push(" AND created_at <= ").push_bind(before);
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn batch_upsert(&self, users: &[User]) -> AppResult<u64> {
        if users.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;

        for chunk in users.chunks(rows_per_chunk(7)) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO users (id, email, name, role, active, created_at, updated_at) ",
            );

            builder.push_values(chunk, |mut b, user| {
                b.push_bind(user.id)
                    .push_bind(&user.email)
                    .push_bind(&user.name)
                    .push_bind(&user.role)
                    .push_bind(user.active)
                    .push_bind(user.created_at)
                    .push_bind(user.updated_at);
            });

            builder.push(
                " ON CONFLICT (email) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 role = EXCLUDED.role, \
                 active = EXCLUDED.active, \
                 updated_at = EXCLUDED.updated_at",
            );

            let result = builder.build().execute(&mut *tx).await?;
            affected += result.rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = sqlx::query_as::<_, User>(
            "SELECT id, email, name, role, active, created_at, updated_at \
             FROM users WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    async fn count(&self, filters: &ExportFilters) -> AppResult<i64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM users WHERE 1=1");
        Self::push_filters(&mut builder, filters);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(count)
    }

    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<User>> {
        let mut builder = QueryBuilder::new(
            "SELECT id, email, name, role, active, created_at, updated_at \
             FROM users WHERE 1=1",
        );
        Self::push_filters(&mut builder, filters);

        if let Some((created_at, id)) = cursor {
            builder
                .push(" AND (created_at, id) > (")
                .push_bind(created_at)
                .push(", ")
                .push_bind(id)
                .push(")");
        }

        builder
            .push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(limit);

        let users = builder
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }
}
