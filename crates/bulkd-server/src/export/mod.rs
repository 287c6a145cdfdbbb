//! Export streaming
//!
//! Forward-only cursor over the target relations, serialized as NDJSON or a
//! JSON array. Record counts are taken on emit, never estimated.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{ExportFilters, ExportFormat, Job, JobStatus, ResourceType};
use crate::repos::{ArticleStore, CommentStore, JobStore, PageCursor, UserStore};

/// Streams filtered entities out of the target relations
pub struct ExportService {
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserStore>,
    articles: Arc<dyn ArticleStore>,
    comments: Arc<dyn CommentStore>,
    batch_size: usize,
    output_path: PathBuf,
}

impl ExportService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        users: Arc<dyn UserStore>,
        articles: Arc<dyn ArticleStore>,
        comments: Arc<dyn CommentStore>,
        batch_size: usize,
        output_path: PathBuf,
    ) -> Self {
        Self {
            jobs,
            users,
            articles,
            comments,
            batch_size,
            output_path,
        }
    }

    /// Fetch one keyset page as serialized values plus the next cursor
    async fn next_page(
        &self,
        resource: ResourceType,
        filters: &ExportFilters,
        cursor: Option<PageCursor>,
    ) -> AppResult<(Vec<serde_json::Value>, Option<PageCursor>)> {
        let limit = self.batch_size as i64;

        match resource {
            ResourceType::Users => {
                let rows = self.users.page_after(filters, cursor, limit).await?;
                let next = rows.last().map(|u| (u.created_at, u.id));
                let values = rows
                    .iter()
                    .filter_map(|u| serde_json::to_value(u).ok())
                    .collect();
                Ok((values, next))
            }
            ResourceType::Articles => {
                let rows = self.articles.page_after(filters, cursor, limit).await?;
                let next = rows.last().map(|a| (a.created_at, a.id));
                let values = rows
                    .iter()
                    .filter_map(|a| serde_json::to_value(a).ok())
                    .collect();
                Ok((values, next))
            }
            ResourceType::Comments => {
                let rows = self.comments.page_after(filters, cursor, limit).await?;
                let next = rows.last().map(|c| (c.created_at, c.id));
                let values = rows
                    .iter()
                    .filter_map(|c| serde_json::to_value(c).ok())
                    .collect();
                Ok((values, next))
            }
        }
    }

    /// Stream entities as NDJSON, one per line. Returns records emitted.
    pub async fn stream_ndjson<W: AsyncWrite + Unpin + Send>(
        &self,
        writer: &mut W,
        resource: ResourceType,
        filters: &ExportFilters,
        cancel: &CancellationToken,
    ) -> AppResult<i64> {
        let mut emitted = 0i64;
        let mut cursor = None;

        loop {
            let (values, next) = self.next_page(resource, filters, cursor).await?;
            if values.is_empty() {
                break;
            }
            let page_len = values.len();

            for value in values {
                let line = serde_json::to_string(&value)
                    .map_err(|e| AppError::Internal(format!("serialization failed: {}", e)))?;
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                emitted += 1;
            }

            if cancel.is_cancelled() {
                return Err(AppError::Internal("cancelled".to_string()));
            }
            if page_len < self.batch_size {
                break;
            }
            cursor = next;
        }

        writer.flush().await?;

        Ok(emitted)
    }

    /// Stream entities as a JSON array. Returns records emitted.
    pub async fn stream_json<W: AsyncWrite + Unpin + Send>(
        &self,
        writer: &mut W,
        resource: ResourceType,
        filters: &ExportFilters,
        cancel: &CancellationToken,
    ) -> AppResult<i64> {
        let mut emitted = 0i64;
        let mut cursor = None;

        writer.write_all(b"[\n").await?;

        loop {
            let (values, next) = self.next_page(resource, filters, cursor).await?;
            if values.is_empty() {
                break;
            }
            let page_len = values.len();

            for value in values {
                if emitted > 0 {
                    writer.write_all(b",\n").await?;
                }
                let line = serde_json::to_string(&value)
                    .map_err(|e| AppError::Internal(format!("serialization failed: {}", e)))?;
                writer.write_all(line.as_bytes()).await?;
                emitted += 1;
            }

            if cancel.is_cancelled() {
                return Err(AppError::Internal("cancelled".to_string()));
            }
            if page_len < self.batch_size {
                break;
            }
            cursor = next;
        }

        writer.write_all(b"\n]").await?;
        writer.flush().await?;

        Ok(emitted)
    }

    /// Process an async export job: stream to a file under the output path
    pub async fn run(
        &self,
        job: &Job,
        format: ExportFormat,
        filters: &ExportFilters,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        info!(job_id = %job.id, resource = %job.resource, format = format.as_str(), "Starting export job");
        let started = std::time::Instant::now();

        self.jobs.set_started(job.id).await?;

        let result = self.write_export_file(job, format, filters, cancel).await;

        match result {
            Ok((file_path, emitted)) => {
                self.jobs.update_file_path(job.id, &file_path).await?;
                self.jobs.set_total_records(job.id, emitted).await?;
                self.jobs.update_progress(job.id, emitted, emitted, 0).await?;
                self.jobs.set_completed(job.id, emitted, 0).await?;
                info!(
                    job_id = %job.id,
                    records = emitted,
                    file_path = %file_path,
                    duration_secs = started.elapsed().as_secs_f64(),
                    "Export job completed"
                );
                Ok(())
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    self.jobs.set_cancelled(job.id, "cancelled").await?;
                } else {
                    self.jobs.set_failed(job.id, &e.to_string()).await?;
                }
                Err(e)
            }
        }
    }

    async fn write_export_file(
        &self,
        job: &Job,
        format: ExportFormat,
        filters: &ExportFilters,
        cancel: &CancellationToken,
    ) -> AppResult<(String, i64)> {
        let job_prefix = job.id.to_string();
        let job_prefix = &job_prefix[..8];
        let unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let filename = format!(
            "{}_{}_{}.{}",
            job.resource.as_str(),
            job_prefix,
            unix,
            format.file_extension()
        );
        let path = self.output_path.join(filename);

        let file = tokio::fs::File::create(&path).await?;
        let mut writer = BufWriter::new(file);

        let emitted = match format {
            ExportFormat::Ndjson => {
                self.stream_ndjson(&mut writer, job.resource, filters, cancel)
                    .await?
            }
            ExportFormat::Json => {
                self.stream_json(&mut writer, job.resource, filters, cancel)
                    .await?
            }
        };

        writer.shutdown().await?;

        Ok((path.to_string_lossy().to_string(), emitted))
    }

    /// File path for a completed export's download
    pub async fn export_file_path(&self, job_id: uuid::Uuid) -> AppResult<String> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound("job not found".to_string()))?;

        if job.status != JobStatus::Completed {
            return Err(AppError::Conflict("job is not completed".to_string()));
        }

        job.file_path
            .ok_or_else(|| AppError::NotFound("export file not available".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::repos::memory::{
        MemoryArticleStore, MemoryCommentStore, MemoryJobStore, MemoryUserStore,
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn service(users: Arc<MemoryUserStore>) -> ExportService {
        ExportService::new(
            Arc::new(MemoryJobStore::new()),
            users,
            Arc::new(MemoryArticleStore::new()),
            Arc::new(MemoryCommentStore::new()),
            2,
            std::env::temp_dir(),
        )
    }

    fn user(email: &str, role: &str, offset_secs: i64) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            name: "Name".into(),
            role: role.into(),
            active: true,
            created_at: Utc::now() + Duration::seconds(offset_secs),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ndjson_counts_on_emit() {
        let users = Arc::new(MemoryUserStore::new());
        users
            .batch_upsert(&[
                user("a@example.com", "admin", 0),
                user("b@example.com", "reader", 1),
                user("c@example.com", "reader", 2),
            ])
            .await
            .unwrap();

        let svc = service(users);
        let mut out = Vec::new();
        let emitted = svc
            .stream_ndjson(
                &mut out,
                ResourceType::Users,
                &ExportFilters::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(emitted, 3);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_ndjson_applies_filters() {
        let users = Arc::new(MemoryUserStore::new());
        users
            .batch_upsert(&[
                user("a@example.com", "admin", 0),
                user("b@example.com", "reader", 1),
            ])
            .await
            .unwrap();

        let svc = service(users);
        let filters = ExportFilters {
            role: Some("admin".into()),
            ..Default::default()
        };
        let mut out = Vec::new();
        let emitted = svc
            .stream_ndjson(
                &mut out,
                ResourceType::Users,
                &filters,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(emitted, 1);
        assert!(String::from_utf8(out).unwrap().contains("a@example.com"));
    }

    #[tokio::test]
    async fn test_json_array_framing() {
        let users = Arc::new(MemoryUserStore::new());
        users
            .batch_upsert(&[
                user("a@example.com", "admin", 0),
                user("b@example.com", "reader", 1),
            ])
            .await
            .unwrap();

        let svc = service(users);
        let mut out = Vec::new();
        let emitted = svc
            .stream_json(
                &mut out,
                ResourceType::Users,
                &ExportFilters::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(emitted, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("[\n"));
        assert!(text.ends_with("\n]"));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_json_array_empty() {
        let svc = service(Arc::new(MemoryUserStore::new()));
        let mut out = Vec::new();
        let emitted = svc
            .stream_json(
                &mut out,
                ResourceType::Users,
                &ExportFilters::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(emitted, 0);
        let parsed: serde_json::Value =
            serde_json::from_str(&String::from_utf8(out).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 0);
    }
}
