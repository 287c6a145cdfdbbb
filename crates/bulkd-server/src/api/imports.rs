//! Import endpoints

use axum::extract::{FromRequest, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Job, JobKind, JobStatus, ResourceType};
use crate::worker::ImportRequest;

use super::AppState;

/// JSON body for URL-based imports
#[derive(Debug, Deserialize)]
pub struct CreateImportBody {
    pub resource: String,
    pub file_url: Option<String>,
}

/// HATEOAS links on job responses
#[derive(Debug, Serialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: String,
    pub errors: String,
}

impl Links {
    fn for_job(job_id: Uuid) -> Self {
        Self {
            self_link: format!("/v1/imports/{job_id}"),
            errors: format!("/v1/imports/{job_id}/errors"),
        }
    }
}

/// Response for a created or replayed import
#[derive(Debug, Serialize)]
pub struct CreateImportResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub resource: ResourceType,
    pub created_at: String,
    pub links: Links,
}

impl CreateImportResponse {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            resource: job.resource,
            created_at: job.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            links: Links::for_job(job.id),
        }
    }
}

/// POST /v1/imports
///
/// Multipart (`file`, `resource`) or JSON `{resource, file_url}`. An
/// `Idempotency-Key` header replays the prior job instead of creating a
/// new one.
pub async fn create_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
) -> AppResult<Response> {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    // Replay: a live key maps to its prior job
    if let Some(key) = &idempotency_key {
        if let Some(job_id) = state.idempotency.get_live(key).await? {
            if let Some(job) = state.jobs.get(job_id).await? {
                return Ok(
                    (StatusCode::OK, Json(CreateImportResponse::from_job(&job))).into_response()
                );
            }
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let (resource, file_path) = if content_type.starts_with("multipart/form-data") {
        read_multipart(&state, request).await?
    } else {
        read_json_body(&state, request).await?
    };

    let mut job = Job::new(JobKind::Import, resource);
    job.file_path = Some(file_path.clone());
    job.idempotency_key = idempotency_key.clone();

    state.jobs.create(&job).await?;

    if let Some(key) = &idempotency_key {
        let expires_at = job.created_at + state.config.idempotency_ttl();
        if let Err(e) = state.idempotency.put(key, job.id, expires_at).await {
            tracing::warn!(error = %e, "Failed to store idempotency key");
        }
    }

    let submit = state.workers.submit_import(ImportRequest {
        job: job.clone(),
        cleanup_path: Some(file_path),
    });

    if let Err(e) = submit {
        state.jobs.set_failed(job.id, "job queue is full").await?;
        return Err(e);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateImportResponse::from_job(&job)),
    )
        .into_response())
}

async fn read_multipart(
    state: &AppState,
    request: axum::extract::Request,
) -> AppResult<(ResourceType, String)> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {}", e)))?;

    let mut resource: Option<ResourceType> = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("resource") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("invalid resource field: {}", e)))?;
                resource = Some(parse_resource(&value)?);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload.csv").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("failed to read file: {}", e)))?;
                upload = Some((filename, data.to_vec()));
            }
            _ => {}
        }
    }

    let resource = resource.ok_or_else(|| AppError::Validation("resource is required".into()))?;
    let (filename, data) =
        upload.ok_or_else(|| AppError::Validation("file is required".into()))?;

    let file_path = state.intake.save_upload(&filename, &data).await?;

    Ok((resource, file_path))
}

async fn read_json_body(
    state: &AppState,
    request: axum::extract::Request,
) -> AppResult<(ResourceType, String)> {
    let Json(body) = Json::<CreateImportBody>::from_request(request, &())
        .await
        .map_err(|e| AppError::Validation(format!("invalid request body: {}", e)))?;

    let resource = parse_resource(&body.resource)?;

    let file_url = body
        .file_url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::Validation("file or file_url is required".into()))?;

    let file_path = state.intake.download_url(&file_url).await?;

    Ok((resource, file_path))
}

fn parse_resource(value: &str) -> AppResult<ResourceType> {
    ResourceType::parse(value)
        .ok_or_else(|| AppError::Validation(format!("invalid resource type: {}", value)))
}

/// Progress block on status responses
#[derive(Debug, Serialize)]
pub struct ProgressBody {
    pub total_records: i64,
    pub processed_records: i64,
    pub successful_records: i64,
    pub failed_records: i64,
    pub percentage: f64,
}

/// Response for GET /v1/imports/{id}
#[derive(Debug, Serialize)]
pub struct ImportStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub resource: ResourceType,
    pub progress: ProgressBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub links: Links,
}

/// GET /v1/imports/{id}
pub async fn get_import_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<ImportStatusResponse>> {
    let job = state
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("job not found".into()))?;

    let progress = job.progress();
    let duration = job.duration_seconds();
    let rows_per_second = duration.filter(|d| *d > 0.0).map(|d| {
        job.processed_records as f64 / d
    });

    Ok(Json(ImportStatusResponse {
        job_id: job.id,
        status: job.status,
        resource: job.resource,
        progress: ProgressBody {
            total_records: progress.total_records,
            processed_records: progress.processed_records,
            successful_records: progress.successful_records,
            failed_records: progress.failed_records,
            percentage: progress.percentage,
        },
        started_at: job
            .started_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        completed_at: job
            .completed_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        duration_seconds: duration,
        rows_per_second,
        error_message: job.error_message.clone(),
        links: Links::for_job(job.id),
    }))
}

/// Pagination query for the error journal
#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// One journal entry in API shape
#[derive(Debug, Serialize)]
pub struct JobErrorItem {
    pub row_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub error_code: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
}

/// Pagination block for the error journal
#[derive(Debug, Serialize)]
pub struct PaginationInfo {
    pub page: i64,
    pub per_page: i64,
    pub total_errors: i64,
    pub total_pages: i64,
}

/// Response for GET /v1/imports/{id}/errors
#[derive(Debug, Serialize)]
pub struct ImportErrorsResponse {
    pub job_id: Uuid,
    pub errors: Vec<JobErrorItem>,
    pub pagination: PaginationInfo,
}

/// GET /v1/imports/{id}/errors
pub async fn get_import_errors(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<ErrorsQuery>,
) -> AppResult<Json<ImportErrorsResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(100).clamp(1, 1000);

    state
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("job not found".into()))?;

    let (errors, total) = state.jobs.errors_page(job_id, page, per_page).await?;

    let total_pages = if total == 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    };

    Ok(Json(ImportErrorsResponse {
        job_id,
        errors: errors
            .into_iter()
            .map(|e| JobErrorItem {
                row_number: e.row_number,
                record_identifier: e.record_identifier,
                field_name: e.field_name,
                error_code: e.error_code,
                error_message: e.error_message,
                raw_data: e.raw_data,
            })
            .collect(),
        pagination: PaginationInfo {
            page,
            per_page,
            total_errors: total,
            total_pages,
        },
    }))
}
