//! Export endpoints

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ExportFilters, ExportFormat, Job, JobKind, JobStatus, ResourceType};
use crate::worker::ExportRequest as WorkerExportRequest;

use super::imports::Links;
use super::AppState;

/// Body for POST /v1/exports
#[derive(Debug, Deserialize)]
pub struct CreateExportBody {
    pub resource: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub filters: Option<ExportFilters>,
    /// Accepted for forward compatibility; projection is not applied
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

/// Response for a created export job
#[derive(Debug, Serialize)]
pub struct CreateExportResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub resource: ResourceType,
    pub format: ExportFormat,
    pub created_at: String,
    pub links: Links,
}

/// POST /v1/exports: asynchronous export job
pub async fn create_export(
    State(state): State<AppState>,
    Json(body): Json<CreateExportBody>,
) -> AppResult<Response> {
    let resource = ResourceType::parse(&body.resource)
        .ok_or_else(|| AppError::Validation(format!("invalid resource type: {}", body.resource)))?;

    let format = match body.format.as_deref() {
        None | Some("") => ExportFormat::Ndjson,
        Some(f) => ExportFormat::parse(f)
            .ok_or_else(|| AppError::Validation(format!("invalid format: {}", f)))?,
    };

    let filters = body.filters.unwrap_or_default();

    let mut job = Job::new(JobKind::Export, resource);
    job.file_format = Some(format.as_str().to_string());

    state.jobs.create(&job).await?;

    let submit = state.workers.submit_export(WorkerExportRequest {
        job: job.clone(),
        format,
        filters,
    });

    if let Err(e) = submit {
        state.jobs.set_failed(job.id, "job queue is full").await?;
        return Err(e);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateExportResponse {
            job_id: job.id,
            status: job.status,
            resource: job.resource,
            format,
            created_at: job.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            links: Links {
                self_link: format!("/v1/exports/{}", job.id),
                errors: format!("/v1/exports/{}/download", job.id),
            },
        }),
    )
        .into_response())
}

/// Query for GET /v1/exports: resource, format, and flattened filters
#[derive(Debug, Deserialize)]
pub struct StreamExportQuery {
    pub resource: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub created_after: Option<String>,
    #[serde(default)]
    pub created_before: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub article_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn parse_filters(query: &StreamExportQuery) -> AppResult<ExportFilters> {
    let mut filters = ExportFilters {
        status: query.status.clone().filter(|s| !s.is_empty()),
        role: query.role.clone().filter(|s| !s.is_empty()),
        ..Default::default()
    };

    if let Some(active) = query.active.as_deref().filter(|s| !s.is_empty()) {
        filters.active = Some(
            active
                .parse()
                .map_err(|_| AppError::Validation("active must be true or false".into()))?,
        );
    }
    if let Some(value) = query.created_after.as_deref().filter(|s| !s.is_empty()) {
        filters.created_after = Some(
            chrono::DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|_| AppError::Validation("created_after must be RFC3339".into()))?,
        );
    }
    if let Some(value) = query.created_before.as_deref().filter(|s| !s.is_empty()) {
        filters.created_before = Some(
            chrono::DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|_| AppError::Validation("created_before must be RFC3339".into()))?,
        );
    }
    if let Some(value) = query.author_id.as_deref().filter(|s| !s.is_empty()) {
        filters.author_id = Some(
            Uuid::parse_str(value)
                .map_err(|_| AppError::Validation("author_id must be a UUID".into()))?,
        );
    }
    if let Some(value) = query.article_id.as_deref().filter(|s| !s.is_empty()) {
        filters.article_id = Some(
            Uuid::parse_str(value)
                .map_err(|_| AppError::Validation("article_id must be a UUID".into()))?,
        );
    }
    if let Some(value) = query.user_id.as_deref().filter(|s| !s.is_empty()) {
        filters.user_id = Some(
            Uuid::parse_str(value)
                .map_err(|_| AppError::Validation("user_id must be a UUID".into()))?,
        );
    }

    Ok(filters)
}

/// GET /v1/exports: synchronous chunked stream
pub async fn stream_export(
    State(state): State<AppState>,
    Query(query): Query<StreamExportQuery>,
) -> AppResult<Response> {
    let resource = ResourceType::parse(&query.resource)
        .ok_or_else(|| AppError::Validation(format!("invalid resource type: {}", query.resource)))?;

    let format = match query.format.as_deref() {
        None | Some("") => ExportFormat::Ndjson,
        Some(f) => ExportFormat::parse(f)
            .ok_or_else(|| AppError::Validation(format!("invalid format: {}", f)))?,
    };

    let filters = parse_filters(&query)?;

    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let exporter = state.exporter.clone();

    tokio::spawn(async move {
        let mut writer = writer;
        let cancel = CancellationToken::new();
        let result = match format {
            ExportFormat::Ndjson => {
                exporter
                    .stream_ndjson(&mut writer, resource, &filters, &cancel)
                    .await
            }
            ExportFormat::Json => {
                exporter
                    .stream_json(&mut writer, resource, &filters, &cancel)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Streaming export failed mid-response");
        }
    });

    let body = Body::from_stream(ReaderStream::new(reader));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, format.content_type())],
        body,
    )
        .into_response())
}

/// GET /v1/exports/{id}/download: completed export as an attachment
pub async fn download_export(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Response> {
    let path = state.exporter.export_file_path(job_id).await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::NotFound("export file not available".into()))?;

    let filename = std::path::Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export")
        .to_string();

    let content_type = if filename.ends_with(".json") {
        "application/json"
    } else {
        "application/x-ndjson"
    };

    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}
