//! Streaming NDJSON parser
//!
//! One JSON object per line, blank lines skipped. A line that fails to parse
//! as the target record type is surfaced with a `None` record and the raw
//! line so the caller can account for it in the error journal.

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::ParsedRow;
use crate::error::{AppError, AppResult};

/// Maximum bytes per NDJSON line
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Streaming NDJSON parser over any buffered async byte source
pub struct NdjsonParser<R: AsyncBufRead + Unpin + Send> {
    reader: R,
    line_number: i64,
}

impl<R: AsyncBufRead + Unpin + Send> NdjsonParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
        }
    }

    /// Next record, or None at end of input.
    ///
    /// A line over the size cap aborts the stream with an error.
    pub async fn next_record<T: DeserializeOwned>(&mut self) -> AppResult<Option<ParsedRow<T>>> {
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let mut limited = (&mut self.reader).take(MAX_LINE_BYTES as u64 + 1);
            let n = limited.read_until(b'\n', &mut buf).await?;

            if n == 0 {
                return Ok(None);
            }
            if buf.len() > MAX_LINE_BYTES {
                return Err(AppError::Validation(format!(
                    "line {} exceeds the {} byte limit",
                    self.line_number + 1,
                    MAX_LINE_BYTES
                )));
            }

            self.line_number += 1;

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record = serde_json::from_str::<T>(line).ok();
            return Ok(Some(ParsedRow {
                row_number: self.line_number,
                record,
                raw: Some(line.to_string()),
            }));
        }
    }

    /// Lines consumed so far
    pub fn lines_read(&self) -> i64 {
        self.line_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::records::{ArticleRecord, UserRecord};

    fn parser(input: &'static str) -> NdjsonParser<&'static [u8]> {
        NdjsonParser::new(input.as_bytes())
    }

    #[tokio::test]
    async fn test_parses_one_object_per_line() {
        let mut p = parser(
            "{\"email\":\"a@example.com\",\"name\":\"A\"}\n\
             {\"email\":\"b@example.com\",\"name\":\"B\"}\n",
        );

        let first = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(first.row_number, 1);
        assert_eq!(first.record.unwrap().email, "a@example.com");

        let second = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(second.row_number, 2);

        assert!(p.next_record::<UserRecord>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blank_lines_skipped() {
        let mut p = parser("\n{\"email\":\"a@example.com\"}\n\n{\"email\":\"b@example.com\"}\n");

        let first = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(first.row_number, 2);
        let second = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(second.row_number, 4);
    }

    #[tokio::test]
    async fn test_invalid_json_yields_raw_line() {
        let mut p = parser("not json at all\n{\"email\":\"ok@example.com\"}\n");

        let bad = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert!(bad.record.is_none());
        assert_eq!(bad.raw.as_deref(), Some("not json at all"));

        let good = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert!(good.record.is_some());
    }

    #[tokio::test]
    async fn test_non_object_line_is_a_parse_failure() {
        let mut p = parser("[1, 2, 3]\n");
        let row = p.next_record::<ArticleRecord>().await.unwrap().unwrap();
        assert!(row.record.is_none());
    }

    #[tokio::test]
    async fn test_no_trailing_newline() {
        let mut p = parser("{\"email\":\"last@example.com\"}");
        let row = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(row.record.unwrap().email, "last@example.com");
        assert!(p.next_record::<UserRecord>().await.unwrap().is_none());
    }
}
