//! Comment target-relation repository

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::{rows_per_chunk, CommentStore, PageCursor};
use crate::error::AppResult;
use crate::models::{Comment, ExportFilters};

/// PostgreSQL-backed comment store
#[derive(Clone)]
pub struct PgCommentStore {
    pool: PgPool,
}

impl PgCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &ExportFilters) {
        if let Some(article_id) = filters.article_id {
            builder.push(" AND article_id = ").push_bind(article_id);
        }
        if let Some(user_id) = filters.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
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
impl CommentStore for PgCommentStore {
    async fn batch_upsert(&self, comments: &[Comment]) -> AppResult<u64> {
        if comments.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;

        for chunk in comments.chunks(rows_per_chunk(6)) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO comments (id, article_id, user_id, body, created_at, updated_at) ",
            );

            builder.push_values(chunk, |mut b, comment| {
                b.push_bind(comment.id)
                    .push_bind(comment.article_id)
                    .push_bind(comment.user_id)
                    .push_bind(&comment.body)
                    .push_bind(comment.created_at)
                    .push_bind(comment.updated_at);
            });

            builder.push(
                " ON CONFLICT (id) DO UPDATE SET \
                 article_id = EXCLUDED.article_id, \
                 user_id = EXCLUDED.user_id, \
                 body = EXCLUDED.body, \
                 updated_at = EXCLUDED.updated_at",
            );

            let result = builder.build().execute(&mut *tx).await?;
            affected += result.rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Comment>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let comments = sqlx::query_as::<_, Comment>(
            "SELECT id, article_id, user_id, body, created_at, updated_at \
             FROM comments WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(comments.into_iter().map(|c| (c.id, c)).collect())
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM comments WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn count(&self, filters: &ExportFilters) -> AppResult<i64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM comments WHERE 1=1");
        Self::push_filters(&mut builder, filters);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(count)
    }

    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<Comment>> {
        let mut builder = QueryBuilder::new(
            "SELECT id, article_id, user_id, body, created_at, updated_at \
             FROM comments WHERE 1=1",
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

        let comments = builder
            .build_query_as::<Comment>()
            .fetch_all(&self.pool)
            .await?;

        Ok(comments)
    }
}
