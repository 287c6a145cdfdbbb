//! Article import validation and conversion

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use super::{is_rfc3339, is_valid_uuid, normalize_slug, parse_rfc3339, RowError};
use crate::error::codes;
use crate::ingest::records::ArticleRecord;
use crate::models::{Article, ALLOWED_ARTICLE_STATUSES};
use crate::repos::StagingArticle;

/// Maximum number of tags per article
pub const MAX_TAGS: usize = 100;

/// Maximum length of a single tag
pub const MAX_TAG_LENGTH: usize = 50;

fn slug_regex() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid slug regex"))
}

/// Whether a string is a well-formed kebab-case slug
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug_regex().is_match(slug)
}

/// Validate one raw article record
pub fn validate(row: i64, record: &ArticleRecord) -> Vec<RowError> {
    let mut errors = Vec::new();
    let identifier = if record.slug.is_empty() {
        record.id.clone()
    } else {
        record.slug.clone()
    };

    if !record.id.is_empty() && !is_valid_uuid(&record.id) {
        errors.push(RowError::new(
            row,
            &identifier,
            "id",
            codes::INVALID_UUID,
            "Invalid UUID format",
        ));
    }

    if record.slug.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "slug",
            codes::MISSING_FIELD,
            "Slug is required",
        ));
    } else if !is_valid_slug(&record.slug) {
        errors.push(RowError::new(
            row,
            &identifier,
            "slug",
            codes::INVALID_SLUG,
            "Slug must be in kebab-case format (lowercase letters, numbers, and hyphens only)",
        ));
    } else if record.slug.chars().count() > 255 {
        errors.push(RowError::new(
            row,
            &identifier,
            "slug",
            codes::INVALID_SLUG,
            "Slug must be at most 255 characters",
        ));
    }

    if record.title.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "title",
            codes::MISSING_FIELD,
            "Title is required",
        ));
    } else if record.title.chars().count() > 500 {
        errors.push(RowError::new(
            row,
            &identifier,
            "title",
            codes::INVALID_TITLE,
            "Title must be at most 500 characters",
        ));
    }

    if record.body.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "body",
            codes::MISSING_FIELD,
            "Body is required",
        ));
    }

    if record.author_id.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "author_id",
            codes::MISSING_FIELD,
            "Author ID is required",
        ));
    } else if !is_valid_uuid(&record.author_id) {
        errors.push(RowError::new(
            row,
            &identifier,
            "author_id",
            codes::INVALID_AUTHOR,
            "Invalid author UUID format",
        ));
    }

    let status = record.status.to_lowercase();
    if record.status.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "status",
            codes::MISSING_FIELD,
            "Status is required",
        ));
    } else if !ALLOWED_ARTICLE_STATUSES.contains(&status.as_str()) {
        errors.push(RowError::new(
            row,
            &identifier,
            "status",
            codes::INVALID_STATUS,
            "Status must be one of: draft, published",
        ));
    }

    if status == "draft" && !record.published_at.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "published_at",
            codes::INVALID_PUBLISHED_AT,
            "Draft articles must not have a published_at date",
        ));
    }

    if status == "published" && record.published_at.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "published_at",
            codes::MISSING_PUBLISHED_AT,
            "Published articles must have a published_at date",
        ));
    }

    if !record.published_at.is_empty() && !is_rfc3339(&record.published_at) {
        errors.push(RowError::new(
            row,
            &identifier,
            "published_at",
            codes::INVALID_TIMESTAMP,
            "Invalid timestamp format (expected ISO8601/RFC3339)",
        ));
    }

    if record.tags.len() > MAX_TAGS {
        errors.push(RowError::new(
            row,
            &identifier,
            "tags",
            codes::INVALID_TAGS,
            "Maximum 100 tags allowed",
        ));
    }
    if record.tags.iter().any(|t| t.chars().count() > MAX_TAG_LENGTH) {
        errors.push(RowError::new(
            row,
            &identifier,
            "tags",
            codes::INVALID_TAGS,
            "Each tag must be at most 50 characters",
        ));
    }

    errors
}

/// Build a normalized staging row from a raw record
pub fn to_staging(row: i64, record: &ArticleRecord, verdict: Option<String>) -> StagingArticle {
    let is_valid = verdict.is_none();
    let tags = if record.tags.is_empty() {
        None
    } else {
        serde_json::to_string(&record.tags).ok()
    };

    StagingArticle {
        row_number: row,
        id: (!record.id.is_empty()).then(|| record.id.clone()),
        slug: (!record.slug.is_empty()).then(|| normalize_slug(&record.slug)),
        title: (!record.title.is_empty()).then(|| record.title.clone()),
        body: (!record.body.is_empty()).then(|| record.body.clone()),
        author_id: (!record.author_id.is_empty()).then(|| record.author_id.clone()),
        tags,
        published_at: (!record.published_at.is_empty()).then(|| record.published_at.clone()),
        status: (!record.status.is_empty()).then(|| record.status.to_lowercase()),
        validation_error: verdict,
        is_valid,
        ..Default::default()
    }
}

/// Convert a surviving staging row into an article entity
pub fn from_staging(staging: &StagingArticle) -> anyhow::Result<Article> {
    let id = match staging.id.as_deref() {
        Some(id) if !id.is_empty() => Uuid::parse_str(id)?,
        _ => Uuid::new_v4(),
    };

    let author_id = staging
        .author_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("staging article has no author_id"))?;
    let author_id = Uuid::parse_str(author_id)?;

    let tags = staging
        .tags
        .as_deref()
        .and_then(|t| serde_json::from_str(t).ok())
        .unwrap_or_else(|| serde_json::json!([]));

    let now = Utc::now();
    Ok(Article {
        id,
        slug: staging.slug.clone().unwrap_or_default(),
        title: staging.title.clone().unwrap_or_default(),
        body: staging.body.clone().unwrap_or_default(),
        author_id,
        tags,
        published_at: staging.published_at.as_deref().and_then(parse_rfc3339),
        status: staging.status.clone().unwrap_or_default(),
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> ArticleRecord {
        ArticleRecord {
            id: String::new(),
            slug: "my-first-post".into(),
            title: "My First Post".into(),
            body: "Hello.".into(),
            author_id: "5864905b-ec8c-4fa6-8ba7-545d13f29b4e".into(),
            tags: vec!["rust".into()],
            published_at: String::new(),
            status: "draft".into(),
        }
    }

    #[test]
    fn test_valid_article() {
        assert!(validate(2, &valid_record()).is_empty());
    }

    #[test]
    fn test_slug_with_spaces_is_invalid() {
        let mut record = valid_record();
        record.slug = "Draft Fast".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_SLUG);
    }

    #[test]
    fn test_slug_uppercase_is_invalid() {
        let mut record = valid_record();
        record.slug = "My-Post".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_SLUG);
    }

    #[test]
    fn test_missing_slug() {
        let mut record = valid_record();
        record.slug = String::new();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::MISSING_FIELD);
        assert_eq!(errors[0].field, "slug");
    }

    #[test]
    fn test_archived_status_rejected() {
        // The database CHECK constraint only permits draft and published
        let mut record = valid_record();
        record.status = "archived".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_STATUS);
    }

    #[test]
    fn test_draft_with_published_at() {
        let mut record = valid_record();
        record.published_at = "2024-01-15T10:30:00Z".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_PUBLISHED_AT);
    }

    #[test]
    fn test_published_without_published_at() {
        let mut record = valid_record();
        record.status = "published".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::MISSING_PUBLISHED_AT);
    }

    #[test]
    fn test_published_with_timestamp_is_valid() {
        let mut record = valid_record();
        record.status = "published".into();
        record.published_at = "2024-01-15T10:30:00Z".into();
        assert!(validate(2, &record).is_empty());
    }

    #[test]
    fn test_invalid_author_uuid() {
        let mut record = valid_record();
        record.author_id = "xyz".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_AUTHOR);
    }

    #[test]
    fn test_too_many_tags() {
        let mut record = valid_record();
        record.tags = (0..101).map(|i| format!("tag{i}")).collect();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_TAGS);
    }

    #[test]
    fn test_overlong_tag() {
        let mut record = valid_record();
        record.tags = vec!["x".repeat(51)];
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_TAGS);
    }

    #[test]
    fn test_staging_normalizes_slug_and_status() {
        let mut record = valid_record();
        record.slug = "Draft Fast".into();
        record.status = "Draft".into();
        let staging = to_staging(2, &record, Some("INVALID_SLUG: bad".into()));
        assert_eq!(staging.slug.as_deref(), Some("draft-fast"));
        assert_eq!(staging.status.as_deref(), Some("draft"));
        assert!(!staging.is_valid);
    }

    #[test]
    fn test_staging_serializes_tags_as_json() {
        let staging = to_staging(2, &valid_record(), None);
        assert_eq!(staging.tags.as_deref(), Some(r#"["rust"]"#));
    }

    #[test]
    fn test_from_staging_round_trips_tags() {
        let staging = to_staging(2, &valid_record(), None);
        let article = from_staging(&staging).unwrap();
        assert_eq!(article.tags, serde_json::json!(["rust"]));
        assert_eq!(article.slug, "my-first-post");
    }
}
