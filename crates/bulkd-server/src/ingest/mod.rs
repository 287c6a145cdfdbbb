//! Streaming import pipeline
//!
//! Parsers stream untrusted delimited or line-JSON input into raw records,
//! validators produce field-level verdicts, and the pipeline stages, checks,
//! and promotes rows per job.

pub mod csv;
pub mod format;
pub mod intake;
pub mod ndjson;
pub mod pipeline;
pub mod records;
pub mod validation;

pub use format::FileFormat;
pub use pipeline::ImportPipeline;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, BufReader};

use crate::error::AppResult;
use csv::{CsvParser, FromCsvRecord};
use ndjson::NdjsonParser;

/// One parsed input row
///
/// `record` is None when the line could not be parsed (NDJSON only; the CSV
/// parser skips malformed rows without a callback). `raw` carries the
/// original line where available.
#[derive(Debug)]
pub struct ParsedRow<T> {
    pub row_number: i64,
    pub record: Option<T>,
    pub raw: Option<String>,
}

/// Unified record stream over both parser families
pub enum RecordReader<R: AsyncBufRead + Unpin + Send> {
    Csv(CsvParser<R>),
    Ndjson(NdjsonParser<R>),
}

impl<R: AsyncBufRead + Unpin + Send> RecordReader<R> {
    /// Open a record stream for the given format
    pub async fn open(source: R, format: FileFormat) -> AppResult<Self> {
        if format.is_csv() {
            Ok(RecordReader::Csv(CsvParser::new(source).await?))
        } else {
            Ok(RecordReader::Ndjson(NdjsonParser::new(source)))
        }
    }

    /// Next row, or None at end of input
    pub async fn next_record<T>(&mut self) -> AppResult<Option<ParsedRow<T>>>
    where
        T: FromCsvRecord + DeserializeOwned,
    {
        match self {
            RecordReader::Csv(parser) => parser.next_record().await,
            RecordReader::Ndjson(parser) => parser.next_record().await,
        }
    }
}

/// Open a record stream over a file on disk
pub async fn open_file_reader(
    path: &str,
    format: FileFormat,
) -> AppResult<RecordReader<BufReader<tokio::fs::File>>> {
    let file = tokio::fs::File::open(path).await?;
    RecordReader::open(BufReader::new(file), format).await
}

#[cfg(test)]
mod tests {
    use super::records::UserRecord;
    use super::*;

    #[tokio::test]
    async fn test_reader_dispatches_by_format() {
        let csv_input = "email,name\na@example.com,A\n";
        let mut reader = RecordReader::open(csv_input.as_bytes(), FileFormat::Csv)
            .await
            .unwrap();
        let row = reader.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(row.row_number, 2);

        let ndjson_input = "{\"email\":\"a@example.com\"}\n";
        let mut reader = RecordReader::open(ndjson_input.as_bytes(), FileFormat::Ndjson)
            .await
            .unwrap();
        let row = reader.next_record::<UserRecord>().await.unwrap().unwrap();
        assert_eq!(row.row_number, 1);
    }
}
