//! User import validation and conversion

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use super::{is_rfc3339, is_valid_uuid, parse_rfc3339, RowError};
use crate::error::codes;
use crate::ingest::records::UserRecord;
use crate::models::{User, ALLOWED_USER_ROLES};
use crate::repos::StagingUser;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
    })
}

/// Validate one raw user record
pub fn validate(row: i64, record: &UserRecord) -> Vec<RowError> {
    let mut errors = Vec::new();
    let identifier = if record.email.is_empty() {
        record.id.clone()
    } else {
        record.email.clone()
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

    if record.email.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "email",
            codes::MISSING_FIELD,
            "Email is required",
        ));
    } else if !email_regex().is_match(&record.email) {
        errors.push(RowError::new(
            row,
            &identifier,
            "email",
            codes::INVALID_EMAIL,
            "Invalid email format",
        ));
    }

    if record.name.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "name",
            codes::MISSING_FIELD,
            "Name is required",
        ));
    } else if record.name.chars().count() > 255 {
        errors.push(RowError::new(
            row,
            &identifier,
            "name",
            codes::INVALID_NAME,
            "Name must be at most 255 characters",
        ));
    }

    if record.role.is_empty() {
        errors.push(RowError::new(
            row,
            &identifier,
            "role",
            codes::MISSING_FIELD,
            "Role is required",
        ));
    } else if !ALLOWED_USER_ROLES.contains(&record.role.to_lowercase().as_str()) {
        errors.push(RowError::new(
            row,
            &identifier,
            "role",
            codes::INVALID_ROLE,
            "Role must be one of: admin, reader, author",
        ));
    }

    if !record.active.is_empty() {
        let active = record.active.to_lowercase();
        if active != "true" && active != "false" {
            errors.push(RowError::new(
                row,
                &identifier,
                "active",
                codes::INVALID_BOOLEAN,
                "Active must be 'true' or 'false'",
            ));
        }
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

    if !record.updated_at.is_empty() && !is_rfc3339(&record.updated_at) {
        errors.push(RowError::new(
            row,
            &identifier,
            "updated_at",
            codes::INVALID_TIMESTAMP,
            "Invalid timestamp format (expected ISO8601/RFC3339)",
        ));
    }

    errors
}

/// Build a normalized staging row from a raw record
pub fn to_staging(row: i64, record: &UserRecord, verdict: Option<String>) -> StagingUser {
    let is_valid = verdict.is_none();
    StagingUser {
        row_number: row,
        id: (!record.id.is_empty()).then(|| record.id.clone()),
        email: (!record.email.is_empty()).then(|| record.email.trim().to_lowercase()),
        name: (!record.name.is_empty()).then(|| record.name.clone()),
        role: (!record.role.is_empty()).then(|| record.role.to_lowercase()),
        active: (!record.active.is_empty()).then(|| record.active.to_lowercase() == "true"),
        created_at: (!record.created_at.is_empty()).then(|| record.created_at.clone()),
        updated_at: (!record.updated_at.is_empty()).then(|| record.updated_at.clone()),
        validation_error: verdict,
        is_valid,
        ..Default::default()
    }
}

/// Convert a surviving staging row into a user entity
pub fn from_staging(staging: &StagingUser) -> anyhow::Result<User> {
    let id = match staging.id.as_deref() {
        Some(id) if !id.is_empty() => Uuid::parse_str(id)?,
        _ => Uuid::new_v4(),
    };

    let now = Utc::now();
    Ok(User {
        id,
        email: staging.email.clone().unwrap_or_default(),
        name: staging.name.clone().unwrap_or_default(),
        role: staging.role.clone().unwrap_or_default(),
        active: staging.active.unwrap_or(true),
        created_at: staging
            .created_at
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or(now),
        updated_at: staging
            .updated_at
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> UserRecord {
        UserRecord {
            id: "5864905b-ec8c-4fa6-8ba7-545d13f29b4e".into(),
            email: "user@example.com".into(),
            name: "Test User".into(),
            role: "admin".into(),
            active: "true".into(),
            created_at: "2024-01-15T10:30:00Z".into(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_valid_user() {
        assert!(validate(2, &valid_record()).is_empty());
    }

    #[test]
    fn test_valid_roles_case_insensitive() {
        for role in ["Admin", "AUTHOR", "reader"] {
            let mut record = valid_record();
            record.role = role.into();
            assert!(validate(2, &record).is_empty(), "role {role} should pass");
        }
    }

    #[test]
    fn test_invalid_email_format() {
        let mut record = valid_record();
        record.email = "foo@bar".into();
        let errors = validate(2, &record);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, codes::INVALID_EMAIL);
    }

    #[test]
    fn test_empty_email_is_missing_field() {
        let mut record = valid_record();
        record.email = String::new();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::MISSING_FIELD);
        assert_eq!(errors[0].field, "email");
    }

    #[test]
    fn test_invalid_role() {
        let mut record = valid_record();
        record.role = "manager".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_ROLE);
    }

    #[test]
    fn test_multiple_errors_accumulate() {
        let mut record = valid_record();
        record.email = "foo@bar".into();
        record.role = "manager".into();
        let errors = validate(2, &record);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_invalid_uuid() {
        let mut record = valid_record();
        record.id = "not-a-uuid".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_UUID);
    }

    #[test]
    fn test_empty_id_is_allowed() {
        let mut record = valid_record();
        record.id = String::new();
        assert!(validate(2, &record).is_empty());
    }

    #[test]
    fn test_invalid_active() {
        let mut record = valid_record();
        record.active = "yes".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_BOOLEAN);
    }

    #[test]
    fn test_invalid_timestamp() {
        let mut record = valid_record();
        record.created_at = "January 15th".into();
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_TIMESTAMP);
    }

    #[test]
    fn test_name_too_long() {
        let mut record = valid_record();
        record.name = "x".repeat(256);
        let errors = validate(2, &record);
        assert_eq!(errors[0].code, codes::INVALID_NAME);
    }

    #[test]
    fn test_staging_normalizes_email_and_role() {
        let mut record = valid_record();
        record.email = "  User@Example.COM ".into();
        record.role = "Admin".into();
        let staging = to_staging(2, &record, None);
        assert_eq!(staging.email.as_deref(), Some("user@example.com"));
        assert_eq!(staging.role.as_deref(), Some("admin"));
        assert!(staging.is_valid);
    }

    #[test]
    fn test_from_staging_generates_id_when_absent() {
        let staging = to_staging(2, &valid_record(), None);
        let user = from_staging(&staging).unwrap();
        assert_eq!(user.id.to_string(), "5864905b-ec8c-4fa6-8ba7-545d13f29b4e");

        let mut record = valid_record();
        record.id = String::new();
        let staging = to_staging(2, &record, None);
        let user = from_staging(&staging).unwrap();
        assert!(!user.id.is_nil());
    }

    #[test]
    fn test_from_staging_defaults_active_true() {
        let mut record = valid_record();
        record.active = String::new();
        let staging = to_staging(2, &record, None);
        let user = from_staging(&staging).unwrap();
        assert!(user.active);
    }
}
