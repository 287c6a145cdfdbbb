//! Per-resource import validators
//!
//! Stateless and pure: each validator maps a raw record to zero or more
//! field-level errors. Conversion to a target entity is a second step that
//! only runs on records that validated clean and survived the bulk checks.

pub mod article;
pub mod comment;
pub mod user;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A field-level validation verdict for one input row
#[derive(Debug, Clone)]
pub struct RowError {
    pub row_number: i64,
    pub record_identifier: String,
    pub field: &'static str,
    pub code: &'static str,
    pub message: &'static str,
}

impl RowError {
    pub fn new(
        row_number: i64,
        record_identifier: impl Into<String>,
        field: &'static str,
        code: &'static str,
        message: &'static str,
    ) -> Self {
        Self {
            row_number,
            record_identifier: record_identifier.into(),
            field,
            code,
            message,
        }
    }
}

/// "CODE: message" for the staging row, from the first error
pub fn staging_verdict(errors: &[RowError]) -> Option<String> {
    errors.first().map(|e| format!("{}: {}", e.code, e.message))
}

pub(crate) fn is_valid_uuid(s: &str) -> bool {
    Uuid::parse_str(s).is_ok()
}

pub(crate) fn is_rfc3339(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Whether a character is punctuation for word-boundary purposes.
/// ASCII plus the common Unicode punctuation blocks (general category P).
fn is_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation()
        || matches!(ch,
            // Latin-1 punctuation
            '\u{00A1}' | '\u{00A7}' | '\u{00AB}' | '\u{00B6}' | '\u{00B7}' | '\u{00BB}' | '\u{00BF}'
            // General punctuation: dashes, curly quotes, daggers, bullet, ellipsis
            | '\u{2010}'..='\u{2027}'
            | '\u{2030}'..='\u{205E}'
            // Supplemental punctuation
            | '\u{2E00}'..='\u{2E7F}'
            // CJK punctuation
            | '\u{3001}'..='\u{3003}'
            | '\u{3008}'..='\u{3011}'
            | '\u{3014}'..='\u{301F}'
            | '\u{30FB}'
            // Fullwidth forms
            | '\u{FF01}'..='\u{FF0F}'
            | '\u{FF1A}'..='\u{FF20}'
            | '\u{FF3B}'..='\u{FF40}'
            | '\u{FF5B}'..='\u{FF65}'
        )
}

/// Count words as maximal runs of non-whitespace, non-punctuation characters
pub fn count_words(s: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;

    for ch in s.chars() {
        if ch.is_whitespace() || is_punctuation(ch) {
            in_word = false;
        } else if !in_word {
            in_word = true;
            count += 1;
        }
    }

    count
}

/// Normalize a slug: lower-case, spaces to hyphens, hyphen runs collapsed
pub fn normalize_slug(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    let mut last_hyphen = false;

    for ch in slug.trim().to_lowercase().chars() {
        let ch = if ch == ' ' { '-' } else { ch };
        if ch == '-' {
            if !last_hyphen {
                out.push('-');
            }
            last_hyphen = true;
        } else {
            out.push(ch);
            last_hyphen = false;
        }
    }

    out
}
