//! Error types shared across bulkd crates

use thiserror::Error;

/// Result type alias for bulkd operations
pub type Result<T> = std::result::Result<T, BulkdError>;

/// Main error type for bulkd
#[derive(Error, Debug)]
pub enum BulkdError {
    /// File system operations failed (read, write, create directory, etc.)
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("Failed to process JSON data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network request failed
    #[error("Network request to '{url}' failed: {reason}")]
    Network { url: String, reason: String },

    /// Database operation failed
    #[error("Database operation failed: {operation} - {reason}")]
    Database { operation: String, reason: String },

    /// Failed to parse input data
    #[error("Failed to parse {data_type}: {reason}")]
    Parse { data_type: String, reason: String },

    /// Unexpected error with details
    #[error("Unexpected error: {message}")]
    Unknown { message: String },
}

impl BulkdError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a database error
    pub fn database(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a parse error
    pub fn parse(data_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            data_type: data_type.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown error
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = BulkdError::config("APP_PORT must be greater than 0");
        assert!(err.to_string().contains("APP_PORT"));
    }

    #[test]
    fn test_network_error_display() {
        let err = BulkdError::network("http://example.com/file.csv", "timed out");
        let msg = err.to_string();
        assert!(msg.contains("http://example.com/file.csv"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BulkdError = io_err.into();
        assert!(matches!(err, BulkdError::Io(_)));
    }
}
