//! Job records, state machine types, and progress accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Import,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Export => "export",
        }
    }
}

impl From<String> for JobKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "export" => JobKind::Export,
            _ => JobKind::Import,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status
///
/// Transitions are monotone forward: pending moves to processing (or
/// cancelled), processing moves to completed, failed, or cancelled.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource a job operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Users,
    Articles,
    Comments,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Users => "users",
            ResourceType::Articles => "articles",
            ResourceType::Comments => "comments",
        }
    }

    /// Parse a client-supplied resource name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "users" => Some(ResourceType::Users),
            "articles" => Some(ResourceType::Articles),
            "comments" => Some(ResourceType::Comments),
            _ => None,
        }
    }
}

impl From<String> for ResourceType {
    fn from(s: String) -> Self {
        ResourceType::parse(&s).unwrap_or(ResourceType::Users)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An import or export job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub resource: ResourceType,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_format: Option<String>,
    pub total_records: i64,
    pub processed_records: i64,
    pub successful_records: i64,
    pub failed_records: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job
    pub fn new(kind: JobKind, resource: ResourceType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            resource,
            status: JobStatus::Pending,
            idempotency_key: None,
            file_path: None,
            file_url: None,
            file_format: None,
            total_records: 0,
            processed_records: 0,
            successful_records: 0,
            failed_records: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compute progress with the pre-terminal percentage clamp
    pub fn progress(&self) -> JobProgress {
        let mut percentage = if self.total_records > 0 {
            (self.processed_records as f64 / self.total_records as f64) * 100.0
        } else {
            0.0
        };

        // Never report 100% while the final phases are still running
        if percentage >= 100.0 && !self.status.is_terminal() {
            percentage = 99.0;
        }

        JobProgress {
            total_records: self.total_records,
            processed_records: self.processed_records,
            successful_records: self.successful_records,
            failed_records: self.failed_records,
            percentage,
        }
    }

    /// Wall-clock duration, using updated_at while still running
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or(self.updated_at);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// Progress counters reported to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_records: i64,
    pub processed_records: i64,
    pub successful_records: i64,
    pub failed_records: i64,
    pub percentage: f64,
}

/// One rejected row in the job error journal
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobError {
    pub id: Uuid,
    pub job_id: Uuid,
    pub row_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub error_code: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobError {
    pub fn new(
        job_id: Uuid,
        row_number: i64,
        record_identifier: Option<String>,
        field_name: Option<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            row_number,
            record_identifier,
            field_name,
            error_code: error_code.into(),
            error_message: error_message.into(),
            raw_data: None,
            created_at: Utc::now(),
        }
    }
}

/// Export output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Ndjson,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Ndjson => "ndjson",
            ExportFormat::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ndjson" => Some(ExportFormat::Ndjson),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Ndjson => "application/x-ndjson",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Ndjson => "ndjson",
            ExportFormat::Json => "json",
        }
    }
}

/// Conjunctive export filters; all optional, AND-composed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from(status.as_str().to_string()), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_resource_parse() {
        assert_eq!(ResourceType::parse("users"), Some(ResourceType::Users));
        assert_eq!(ResourceType::parse("orders"), None);
    }

    #[test]
    fn test_progress_percentage() {
        let mut job = Job::new(JobKind::Import, ResourceType::Users);
        job.total_records = 200;
        job.processed_records = 50;
        assert_eq!(job.progress().percentage, 25.0);
    }

    #[test]
    fn test_progress_clamped_before_terminal() {
        let mut job = Job::new(JobKind::Import, ResourceType::Users);
        job.status = JobStatus::Processing;
        job.total_records = 100;
        job.processed_records = 100;
        assert_eq!(job.progress().percentage, 99.0);

        job.status = JobStatus::Completed;
        assert_eq!(job.progress().percentage, 100.0);
    }

    #[test]
    fn test_progress_zero_total() {
        let job = Job::new(JobKind::Import, ResourceType::Users);
        assert_eq!(job.progress().percentage, 0.0);
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!(ExportFormat::parse("ndjson"), Some(ExportFormat::Ndjson));
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("csv"), None);
    }

    #[test]
    fn test_duration_uses_completed_at() {
        let mut job = Job::new(JobKind::Import, ResourceType::Users);
        let start = Utc::now();
        job.started_at = Some(start);
        job.completed_at = Some(start + chrono::Duration::seconds(12));
        assert_eq!(job.duration_seconds(), Some(12.0));
    }
}
