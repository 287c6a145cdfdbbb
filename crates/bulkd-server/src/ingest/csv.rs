//! Streaming CSV parser
//!
//! Reads a header row, builds a case-insensitive name-to-index map, then
//! streams data rows. Field counts are flexible, values are trimmed, missing
//! columns map to empty strings and surplus columns are ignored. A malformed
//! row advances the row counter and is skipped; the stream continues.

use csv_async::{AsyncReaderBuilder, StringRecord};
use std::collections::HashMap;
use tokio::io::AsyncRead;

use super::ParsedRow;
use crate::error::{AppError, AppResult};

/// Read buffer for the underlying CSV decoder
const CSV_BUFFER_CAPACITY: usize = 64 * 1024;

/// Case-insensitive column name to index map
pub type HeaderMap = HashMap<String, usize>;

/// Extract a raw record from one CSV row using the header map
pub trait FromCsvRecord: Sized {
    fn from_csv(header: &HeaderMap, record: &StringRecord) -> Self;
}

/// Fetch a named column from a record, trimmed; missing columns are empty
pub fn field(header: &HeaderMap, record: &StringRecord, name: &str) -> String {
    header
        .get(name)
        .and_then(|&idx| record.get(idx))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// Streaming CSV parser over any async byte source
pub struct CsvParser<R: AsyncRead + Unpin + Send> {
    reader: csv_async::AsyncReader<R>,
    header: HeaderMap,
    // Header is row 1; data rows start at 2
    row_number: i64,
}

impl<R: AsyncRead + Unpin + Send> CsvParser<R> {
    /// Build a parser, consuming the header row
    pub async fn new(source: R) -> AppResult<Self> {
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .buffer_capacity(CSV_BUFFER_CAPACITY)
            .create_reader(source);

        let headers = reader
            .headers()
            .await
            .map_err(|e| AppError::Validation(format!("failed to read CSV headers: {}", e)))?;

        let header: HeaderMap = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();

        Ok(Self {
            reader,
            header,
            row_number: 1,
        })
    }

    /// Next data row, or None at end of input.
    ///
    /// Malformed rows are skipped (the row counter still advances); IO
    /// errors abort the stream.
    pub async fn next_record<T: FromCsvRecord>(&mut self) -> AppResult<Option<ParsedRow<T>>> {
        let mut record = StringRecord::new();

        loop {
            match self.reader.read_record(&mut record).await {
                Ok(false) => return Ok(None),
                Ok(true) => {
                    self.row_number += 1;
                    return Ok(Some(ParsedRow {
                        row_number: self.row_number,
                        record: Some(T::from_csv(&self.header, &record)),
                        raw: None,
                    }));
                }
                Err(e) => match e.kind() {
                    csv_async::ErrorKind::Io(_) => {
                        return Err(AppError::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            e.to_string(),
                        )));
                    }
                    _ => {
                        // Malformed row; skip and keep streaming
                        self.row_number += 1;
                        continue;
                    }
                },
            }
        }
    }

    /// Rows seen so far, including the header row
    pub fn rows_read(&self) -> i64 {
        self.row_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::records::{ArticleRecord, UserRecord};

    async fn parser(input: &'static str) -> CsvParser<&'static [u8]> {
        CsvParser::new(input.as_bytes()).await.unwrap()
    }

    #[tokio::test]
    async fn test_parses_users_with_row_numbers() {
        let mut p = parser(
            "id,email,name,role,active,created_at\n\
             ,alice@example.com,Alice,admin,true,2024-01-15T10:30:00Z\n\
             ,bob@example.com,Bob,reader,false,2024-01-16T10:30:00Z\n",
        )
        .await;

        let first = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(first.row_number, 2);
        let record = first.record.unwrap();
        assert_eq!(record.email, "alice@example.com");
        assert_eq!(record.role, "admin");

        let second = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(second.row_number, 3);

        assert!(p.next_record::<UserRecord>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_header_is_case_insensitive_and_trimmed() {
        let mut p = parser("ID, Email ,NAME\n1,a@b.com,Alice\n").await;
        let row = p.next_record::<UserRecord>().await.unwrap().unwrap();
        let record = row.record.unwrap();
        assert_eq!(record.id, "1");
        assert_eq!(record.email, "a@b.com");
        assert_eq!(record.name, "Alice");
    }

    #[tokio::test]
    async fn test_missing_columns_are_empty() {
        let mut p = parser("email\nonly@example.com\n").await;
        let row = p.next_record::<UserRecord>().await.unwrap().unwrap();
        let record = row.record.unwrap();
        assert_eq!(record.email, "only@example.com");
        assert_eq!(record.name, "");
        assert_eq!(record.role, "");
    }

    #[tokio::test]
    async fn test_variable_field_counts() {
        let mut p = parser("email,name,role\nshort@example.com\nlong@example.com,Name,admin,surplus\n").await;

        let first = p.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(first.record.unwrap().email, "short@example.com");

        let second = p.next_record::<UserRecord>().await.unwrap().unwrap();
        let record = second.record.unwrap();
        assert_eq!(record.email, "long@example.com");
        assert_eq!(record.role, "admin");
    }

    #[tokio::test]
    async fn test_values_are_trimmed() {
        let mut p = parser("email,name\n  padded@example.com , Spaced Name \n").await;
        let record = p
            .next_record::<UserRecord>()
            .await
            .unwrap()
            .unwrap()
            .record
            .unwrap();
        assert_eq!(record.email, "padded@example.com");
        assert_eq!(record.name, "Spaced Name");
    }

    #[tokio::test]
    async fn test_quoted_fields() {
        let mut p = parser("slug,title,body,tags\nhello,\"Title, with comma\",Body,\"a, b\"\n").await;
        let record = p
            .next_record::<ArticleRecord>()
            .await
            .unwrap()
            .unwrap()
            .record
            .unwrap();
        assert_eq!(record.title, "Title, with comma");
        assert_eq!(record.tags, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_article_tags_comma_split() {
        let mut p = parser("slug,tags\npost,\"rust, async , sqlx\"\n").await;
        let record = p
            .next_record::<ArticleRecord>()
            .await
            .unwrap()
            .unwrap()
            .record
            .unwrap();
        assert_eq!(record.tags, vec!["rust", "async", "sqlx"]);
    }
}
