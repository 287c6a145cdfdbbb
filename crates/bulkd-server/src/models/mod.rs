//! Domain models

pub mod job;

pub use job::{
    ExportFilters, ExportFormat, Job, JobError, JobKind, JobProgress, JobStatus, ResourceType,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allowed user roles
pub const ALLOWED_USER_ROLES: [&str; 3] = ["admin", "author", "reader"];

/// Allowed article statuses. The database CHECK constraint is authoritative
/// here and does not permit `archived`.
pub const ALLOWED_ARTICLE_STATUSES: [&str; 2] = ["draft", "published"];

/// Maximum word count for comment bodies
pub const MAX_COMMENT_WORDS: usize = 500;

/// A user entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An article entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub body: String,
    pub author_id: Uuid,
    /// JSON array of tag strings
    pub tags: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A comment entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub article_id: Uuid,
    pub user_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
