//! Comment import validation and conversion

use chrono::Utc;
use uuid::Uuid;

use super::{count_words, is_rfc3339, is_valid_uuid, parse_rfc3339, RowError};
use crate::error::codes;
use crate::ingest::records::CommentRecord;
use crate::models::{Comment, MAX_COMMENT_WORDS};
use crate::repos::StagingComment;

/// Validate one raw comment record
pub fn validate(row: i64, record: &CommentRecord) -> Vec<RowError> {
    let mut errors = Vec::new();
    let identifier = if record.id.is_empty() {
        format!("row-{row}")
    } else {
        record.id.clone()
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

    if record.article_id.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "article_id",
            codes::MISSING_FIELD,
            "Article ID is required",
        ));
    } else if !is_valid_uuid(&record.article_id) {
        errors.push(RowError::new(
            row,
            &identifier,
            "article_id",
            codes::INVALID_ARTICLE,
            "Invalid article UUID format",
        ));
    }

    if record.user_id.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "user_id",
            codes::MISSING_FIELD,
            "User ID is required",
        ));
    } else if !is_valid_uuid(&record.user_id) {
        errors.push(RowError::new(
            row,
            &identifier,
            "user_id",
            codes::INVALID_USER,
            "Invalid user UUID format",
        ));
    }

    if record.body.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "body",
            codes::BODY_EMPTY,
            "Comment body is required",
        ));
    } else if count_words(&record.body) > MAX_COMMENT_WORDS {
        errors.push(RowError::new(
            row,
            &identifier,
            "body",
            codes::BODY_TOO_LONG,
            "Comment body exceeds maximum of 500 words",
        ));
    }

    if !record.created_at.is_empty() && !is_rfc3339(&record.created_at) {
        errors.push(RowError::new(
            row,
            &identifier,
            "created_at",
            codes::INVALID_TIMESTAMP,
            "Invalid timestamp format (expected ISO8601/RFC3339)",
        ));
    }

    errors
}

/// Build a staging row from a raw record
pub fn to_staging(row: i64, record: &CommentRecord, verdict: Option<String>) -> StagingComment {
    let is_valid = verdict.is_none();
    StagingComment {
        row_number: row,
        id: (!record.id.is_empty()).then(|| record.id.clone()),
        article_id: (!record.article_id.is_empty()).then(|| record.article_id.clone()),
        user_id: (!record.user_id.is_empty()).then(|| record.user_id.clone()),
        body: (!record.body.is_empty()).then(|| record.body.clone()),
        created_at: (!record.created_at.is_empty()).then(|| record.created_at.clone()),
        validation_error: verdict,
        is_valid,
        ..Default::default()
    }
}

/// Convert a surviving staging row into a comment entity
pub fn from_staging(staging: &StagingComment) -> anyhow::Result<Comment> {
    let id = match staging.id.as_deref() {
        Some(id) if !id.is_empty() => Uuid::parse_str(id)?,
        _ => Uuid::new_v4(),
    };

    let article_id = staging
        .article_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("staging comment has no article_id"))?;
    let user_id = staging
        .user_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("staging comment has no user_id"))?;

    let now = Utc::now();
    Ok(Comment {
        id,
        article_id: Uuid::parse_str(article_id)?,
        user_id: Uuid::parse_str(user_id)?,
        body: staging.body.clone().unwrap_or_default(),
        created_at: staging
            .created_at
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or(now),
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> CommentRecord {
        CommentRecord {
            id: String::new(),
            article_id: "5864905b-ec8c-4fa6-8ba7-545d13f29b4e".into(),
            user_id: "6f304cd1-8a43-4417-aec7-55f419572494".into(),
            body: "Nice read.".into(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_valid_comment() {
        assert!(validate(2, &valid_record()).is_empty());
    }

    #[test]
    fn test_missing_article_id() {
        let mut record = valid_record();
        record.article_id = String::new();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::MISSING_FIELD);
        assert_eq!(errors[0].field, "article_id");
    }

    #[test]
    fn test_malformed_article_id() {
        let mut record = valid_record();
        record.article_id = "not-a-uuid".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_ARTICLE);
    }

    #[test]
    fn test_malformed_user_id() {
        let mut record = valid_record();
        record.user_id = "also-bad".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_USER);
    }

    #[test]
    fn test_empty_body() {
        let mut record = valid_record();
        record.body = String::new();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::BODY_EMPTY);
    }

    #[test]
    fn test_body_at_word_limit_is_valid() {
        let mut record = valid_record();
        record.body = vec!["word"; 500].join(" ");
        assert!(validate(2, &record).is_empty());
    }

    #[test]
    fn test_body_over_word_limit() {
        let mut record = valid_record();
        record.body = vec!["word"; 501].join(" ");
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::BODY_TOO_LONG);
    }

    #[test]
    fn test_from_staging_parses_ids() {
        let staging = to_staging(2, &valid_record(), None);
        let comment = from_staging(&staging).unwrap();
        assert_eq!(
            comment.article_id.to_string(),
            "5864905b-ec8c-4fa6-8ba7-545d13f29b4e"
        );
        assert_eq!(comment.body, "Nice read.");
    }
}
