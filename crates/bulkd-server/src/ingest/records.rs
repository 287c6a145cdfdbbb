//! Raw import records
//!
//! Untyped, all-string representations of one input row, shared by the CSV
//! and NDJSON parsers. Validation and conversion to domain entities happen
//! downstream.

use serde::Deserialize;

use super::csv::{field, FromCsvRecord, HeaderMap};

/// One raw user row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub active: String,
    pub created_at: String,
    pub updated_at: String,
}

impl FromCsvRecord for UserRecord {
    fn from_csv(header: &HeaderMap, record: &csv_async::StringRecord) -> Self {
        Self {
            id: field(header, record, "id"),
            email: field(header, record, "email"),
            name: field(header, record, "name"),
            role: field(header, record, "role"),
            active: field(header, record, "active"),
            created_at: field(header, record, "created_at"),
            updated_at: field(header, record, "updated_at"),
        }
    }
}

/// One raw article row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArticleRecord {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub body: String,
    pub author_id: String,
    pub tags: Vec<String>,
    pub published_at: String,
    pub status: String,
}

impl FromCsvRecord for ArticleRecord {
    fn from_csv(header: &HeaderMap, record: &csv_async::StringRecord) -> Self {
        // CSV tags are a best-effort comma split; NDJSON is the canonical
        // format for articles
        let tags = field(header, record, "tags");
        let tags = if tags.is_empty() {
            Vec::new()
        } else {
            tags.split(',').map(|t| t.trim().to_string()).collect()
        };

        Self {
            id: field(header, record, "id"),
            slug: field(header, record, "slug"),
            title: field(header, record, "title"),
            body: field(header, record, "body"),
            author_id: field(header, record, "author_id"),
            tags,
            published_at: field(header, record, "published_at"),
            status: field(header, record, "status"),
        }
    }
}

/// One raw comment row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentRecord {
    pub id: String,
    pub article_id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: String,
}

impl FromCsvRecord for CommentRecord {
    fn from_csv(header: &HeaderMap, record: &csv_async::StringRecord) -> Self {
        Self {
            id: field(header, record, "id"),
            article_id: field(header, record, "article_id"),
            user_id: field(header, record, "user_id"),
            body: field(header, record, "body"),
            created_at: field(header, record, "created_at"),
        }
    }
}
