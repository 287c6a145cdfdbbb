//! Import file intake: uploads and URL downloads

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use futures::StreamExt;

use crate::error::{AppError, AppResult};

/// Per-request timeout for URL downloads
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard cap on downloaded response bodies (500 MiB)
const MAX_DOWNLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// Saves uploaded and downloaded import files under the configured
/// upload directory with collision-free names.
#[derive(Clone)]
pub struct FileIntake {
    upload_path: PathBuf,
    max_file_size: u64,
}

impl FileIntake {
    pub fn new(upload_path: PathBuf, max_file_size: u64) -> Self {
        Self {
            upload_path,
            max_file_size,
        }
    }

    /// Persist uploaded bytes, returning the stored path
    pub async fn save_upload(&self, filename: &str, data: &[u8]) -> AppResult<String> {
        if data.len() as u64 > self.max_file_size {
            return Err(AppError::FileTooLarge(format!(
                "file exceeds the {} byte limit",
                self.max_file_size
            )));
        }

        let path = self.unique_path(filename);
        tokio::fs::write(&path, data).await?;

        Ok(path.to_string_lossy().to_string())
    }

    /// Download a file from an http(s) URL, returning the stored path
    pub async fn download_url(&self, file_url: &str) -> AppResult<String> {
        let parsed = reqwest::Url::parse(file_url)
            .map_err(|e| AppError::Validation(format!("invalid URL: {}", e)))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(AppError::Validation(
                "URL scheme must be http or https".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let response = client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| AppError::Validation(format!("failed to download file: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Validation(format!(
                "failed to download file: server returned {}",
                response.status().as_u16()
            )));
        }

        let filename = filename_from_response(&parsed, response.headers());
        let path = self.unique_path(&filename);

        let mut file = tokio::fs::File::create(&path).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Validation(format!("download failed: {}", e)))?;
            written += chunk.len() as u64;
            if written > MAX_DOWNLOAD_BYTES.min(self.max_file_size) {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(AppError::FileTooLarge(format!(
                    "downloaded file exceeds the {} byte limit",
                    MAX_DOWNLOAD_BYTES.min(self.max_file_size)
                )));
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        Ok(path.to_string_lossy().to_string())
    }

    /// Unique on-disk name: original stem plus a nanosecond suffix
    fn unique_path(&self, filename: &str) -> PathBuf {
        let filename = sanitize_filename(filename);
        let stem = Path::new(&filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("upload");
        let ext = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        self.upload_path.join(format!("{stem}_{nanos}{ext}"))
    }
}

/// Strip any path components from a client-supplied filename
fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        "downloaded_file".to_string()
    } else {
        name.to_string()
    }
}

/// Filename from Content-Disposition, falling back to the URL path
fn filename_from_response(url: &reqwest::Url, headers: &reqwest::header::HeaderMap) -> String {
    if let Some(cd) = headers
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(name) = parse_content_disposition_filename(cd) {
            return name;
        }
    }

    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "downloaded_file".to_string())
}

/// Extract `filename=...` from a Content-Disposition header value
fn parse_content_disposition_filename(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"').trim();
            if !name.is_empty() {
                return Some(sanitize_filename(name));
            }
        }
    }
    None
}
