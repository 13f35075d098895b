//! Input resolution: turn a user-supplied path or URL into an in-memory
//! [`FilePayload`].
//!
//! Everything downstream works on bytes: the fingerprint is a hash of the
//! raw content, and every adapter reads from memory. The filename and
//! declared content type travel with the bytes because the processor
//! registry uses them to pick an adapter.

use crate::error::OcrError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A file to be processed: name, optional declared MIME type, raw bytes.
#[derive(Clone)]
pub struct FilePayload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for FilePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePayload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl FilePayload {
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data: data.into(),
        }
    }

    /// Lower-cased extension without the dot, or `""`.
    pub fn suffix(&self) -> String {
        match self.filename.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => ext.to_ascii_lowercase(),
            _ => String::new(),
        }
    }

    /// Filename without directories and without the last extension.
    pub fn stem(&self) -> &str {
        let name = self.filename.rsplit('/').next().unwrap_or(&self.filename);
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// Declared MIME type, lower-cased and stripped of parameters.
    pub fn mime(&self) -> Option<String> {
        self.content_type.as_ref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to a [`FilePayload`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<FilePayload, OcrError> {
    if input.trim().is_empty() {
        return Err(OcrError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

/// Read a local file, mapping I/O failures to input errors.
pub async fn read_local(path: &Path) -> Result<FilePayload, OcrError> {
    let data = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => OcrError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => OcrError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());

    debug!("Read local file: {} ({} bytes)", path.display(), data.len());
    Ok(FilePayload::new(filename, None, data))
}

/// Download a URL into memory, keeping the server's content type.
async fn download_url(url: &str, timeout_secs: u64) -> Result<FilePayload, OcrError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| OcrError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            OcrError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            OcrError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(OcrError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let bytes = response.bytes().await.map_err(|e| OcrError::DownloadFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let filename = filename_from_url(url)
        .unwrap_or_else(|| format!("remote-{}", uuid::Uuid::new_v4().simple()));

    info!("Downloaded {} bytes as '{}'", bytes.len(), filename);
    Ok(FilePayload::new(filename, content_type, bytes.to_vec()))
}

/// Last non-empty path segment of a URL, if it looks like a filename.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}

/// Object name → filename used for adapter selection.
pub fn filename_from_object(object_name: &str) -> String {
    object_name
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(object_name)
        .to_string()
}

/// Path form of a local input, for error messages.
pub fn display_path(input: &str) -> PathBuf {
    PathBuf::from(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn suffix_and_stem() {
        let p = FilePayload::new("Report.Final.PDF", None, vec![]);
        assert_eq!(p.suffix(), "pdf");
        assert_eq!(p.stem(), "Report.Final");

        let p = FilePayload::new("noext", None, vec![]);
        assert_eq!(p.suffix(), "");
        assert_eq!(p.stem(), "noext");
    }

    #[test]
    fn mime_strips_parameters() {
        let p = FilePayload::new("x", Some("Image/PNG; charset=binary".into()), vec![]);
        assert_eq!(p.mime().as_deref(), Some("image/png"));
    }

    #[test]
    fn url_filenames() {
        assert_eq!(
            filename_from_url("https://host/a/b/scan.png?x=1").as_deref(),
            Some("scan.png")
        );
        assert_eq!(filename_from_url("https://host/"), None);
        assert_eq!(filename_from_object("inbox/2024/file.docx"), "file.docx");
        assert_eq!(filename_from_object("plain.pdf"), "plain.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, OcrError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let err = resolve_input("  ", 5).await.unwrap_err();
        assert!(matches!(err, OcrError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        tokio::fs::write(&path, b"bytes").await.unwrap();
        let payload = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(payload.filename, "page.png");
        assert_eq!(payload.data, b"bytes");
        assert!(payload.content_type.is_none());
    }
}
