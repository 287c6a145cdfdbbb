//! Input file format detection

use std::path::Path;

/// Format of an import file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Ndjson,
    Json,
}

impl FileFormat {
    /// Detect the format from a filename extension.
    ///
    /// Unknown extensions default to CSV.
    pub fn detect(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => FileFormat::Csv,
            "ndjson" | "jsonl" => FileFormat::Ndjson,
            "json" => FileFormat::Json,
            _ => FileFormat::Csv,
        }
    }

    /// Parse an explicit format hint
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "ndjson" | "jsonl" => Some(FileFormat::Ndjson),
            "json" => Some(FileFormat::Json),
            _ => None,
        }
    }

    pub fn is_csv(&self) -> bool {
        matches!(self, FileFormat::Csv)
    }

    /// JSON files are parsed line-wise, same as NDJSON
    pub fn is_ndjson(&self) -> bool {
        matches!(self, FileFormat::Ndjson | FileFormat::Json)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Ndjson => "ndjson",
            FileFormat::Json => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(FileFormat::detect("users.csv"), FileFormat::Csv);
        assert_eq!(FileFormat::detect("users.CSV"), FileFormat::Csv);
        assert_eq!(FileFormat::detect("articles.ndjson"), FileFormat::Ndjson);
        assert_eq!(FileFormat::detect("articles.jsonl"), FileFormat::Ndjson);
        assert_eq!(FileFormat::detect("comments.json"), FileFormat::Json);
    }

    #[test]
    fn test_detect_defaults_to_csv() {
        assert_eq!(FileFormat::detect("data.txt"), FileFormat::Csv);
        assert_eq!(FileFormat::detect("no_extension"), FileFormat::Csv);
        assert_eq!(FileFormat::detect(""), FileFormat::Csv);
    }

    #[test]
    fn test_json_parses_as_ndjson() {
        assert!(FileFormat::Json.is_ndjson());
        assert!(FileFormat::Ndjson.is_ndjson());
        assert!(!FileFormat::Csv.is_ndjson());
    }

    #[test]
    fn test_parse_hint() {
        assert_eq!(FileFormat::parse("csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::parse("NDJSON"), Some(FileFormat::Ndjson));
        assert_eq!(FileFormat::parse("parquet"), None);
    }
}
