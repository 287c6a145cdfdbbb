//! Article target-relation repository

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::{rows_per_chunk, ArticleStore, PageCursor};
use crate::error::AppResult;
use crate::models::{Article, ExportFilters};

/// PostgreSQL-backed article store
#[derive(Clone)]
pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &ExportFilters) {
        if let Some(status) = &filters.status {
            builder.push(" AND status = ").push_bind(status.clone());
        }
        if let Some(author_id) = filters.author_id {
            builder.push(" AND author_id = ").push_bind(author_id);
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
impl ArticleStore for PgArticleStore {
    async fn batch_upsert(&self, articles: &[Article]) -> AppResult<u64> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;

        for chunk in articles.chunks(rows_per_chunk(10)) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO articles (id, slug, title, body, author_id, tags, \
                 published_at, status, created_at, updated_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.id)
                    .push_bind(&article.slug)
                    .push_bind(&article.title)
                    .push_bind(&article.body)
                    .push_bind(article.author_id)
                    .push_bind(&article.tags)
                    .push_bind(article.published_at)
                    .push_bind(&article.status)
                    .push_bind(article.created_at)
                    .push_bind(article.updated_at);
            });

            builder.push(
                " ON CONFLICT (slug) DO UPDATE SET \
                 title = EXCLUDED.title, \
                 body = EXCLUDED.body, \
                 author_id = EXCLUDED.author_id, \
                 tags = EXCLUDED.tags, \
                 published_at = EXCLUDED.published_at, \
                 status = EXCLUDED.status, \
                 updated_at = EXCLUDED.updated_at",
            );

            let result = builder.build().execute(&mut *tx).await?;
            affected += result.rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Article>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let articles = sqlx::query_as::<_, Article>(
            "SELECT id, slug, title, body, author_id, tags, published_at, status, \
             created_at, updated_at FROM articles WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(articles.into_iter().map(|a| (a.id, a)).collect())
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM articles WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn count(&self, filters: &ExportFilters) -> AppResult<i64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM articles WHERE 1=1");
        Self::push_filters(&mut builder, filters);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(count)
    }

    async fn page_after(
        &self,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
        limit: i64,
    ) -> AppResult<Vec<Article>> {
        let mut builder = QueryBuilder::new(
            "SELECT id, slug, title, body, author_id, tags, published_at, status, \
             created_at, updated_at FROM articles WHERE 1=1",
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

        let articles = builder
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await?;

        Ok(articles)
    }
}
