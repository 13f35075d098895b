//! Error types for the edgequake-ocr library.
//!
//! Three layers of failure, each with its own type:
//!
//! * [`OcrError`] (fatal): the job cannot produce a document (unsupported
//!   file, conversion failure, one or more pages failed, cancelled). Returned
//!   as `Err(OcrError)` from every [`crate::engine::OcrEngine`] operation.
//!
//! * [`InferenceError`] (page-level): one call to the inference endpoint
//!   failed. Transient kinds are retried inside
//!   [`crate::inference::InferenceClient`]; whatever survives the retries is
//!   stored on the page's [`crate::output::PageResult`] and aggregated into
//!   [`OcrError::JobFailed`] by the dispatch engine.
//!
//! * [`CacheError`] / [`StorageError`]: collaborator failures. Cache errors
//!   never fail a job: reads degrade to a miss and writes are logged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-ocr library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is neither a file path nor a valid URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Processor errors ──────────────────────────────────────────────────
    /// No adapter in the registry accepts this file.
    #[error("Unsupported file type: {detail}")]
    UnsupportedFileType { detail: String },

    /// An adapter failed to turn the file into page units.
    #[error("Conversion of '{file}' failed: {detail}")]
    ConversionFailed { file: String, detail: String },

    /// The document has more pages than the configured maximum.
    #[error("Document has {pages} pages, more than the allowed {max}")]
    TooManyPages { pages: usize, max: usize },

    /// The adapter produced no page units at all.
    #[error("Document '{file}' contains no pages")]
    EmptyDocument { file: String },

    // ── Job errors ────────────────────────────────────────────────────────
    /// One or more pages failed; no partial text is returned.
    #[error("{} of {total} pages failed (pages {})", failed.len(), format_indices(failed))]
    JobFailed {
        failed: Vec<FailedPage>,
        total: usize,
    },

    /// The caller cancelled the job (or its deadline passed) before every
    /// page completed.
    #[error("Job cancelled after {completed}/{total} pages")]
    Cancelled { completed: usize, total: usize },

    /// The configured inference provider could not be initialised.
    #[error("Inference provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Result persistence was requested but no object store is attached.
    #[error("Storage client is not configured")]
    StorageNotConfigured,

    /// The object store rejected a read or write.
    #[error(transparent)]
    Storage(#[from] StorageError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    /// Page indices (0-based) that caused a [`OcrError::JobFailed`], empty otherwise.
    pub fn failed_pages(&self) -> Vec<usize> {
        match self {
            OcrError::JobFailed { failed, .. } => failed.iter().map(|f| f.index).collect(),
            _ => Vec::new(),
        }
    }
}

fn format_indices(failed: &[FailedPage]) -> String {
    failed
        .iter()
        .map(|f| f.index.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One failed page inside [`OcrError::JobFailed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPage {
    /// 0-based page index.
    pub index: usize,
    pub kind: InferenceErrorKind,
    pub detail: String,
}

/// Classification of a failed inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceErrorKind {
    /// The call exceeded its deadline.
    Timeout,
    /// The endpoint could not be reached.
    ConnectionRefused,
    /// Any other transient network failure (reset, 429, 502, 503).
    Transport,
    /// The endpoint answered but signalled that inference failed.
    ModelError,
}

impl InferenceErrorKind {
    /// Whether the inference client may retry this kind of failure.
    pub fn is_retryable(self) -> bool {
        !matches!(self, InferenceErrorKind::ModelError)
    }
}

impl fmt::Display for InferenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InferenceErrorKind::Timeout => "timeout",
            InferenceErrorKind::ConnectionRefused => "connection refused",
            InferenceErrorKind::Transport => "transport error",
            InferenceErrorKind::ModelError => "model error",
        };
        f.write_str(s)
    }
}

/// A single failed call to the inference endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct InferenceError {
    pub kind: InferenceErrorKind,
    pub detail: String,
}

impl InferenceError {
    pub fn new(kind: InferenceErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::Timeout, detail)
    }

    pub fn connection_refused(detail: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::ConnectionRefused, detail)
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::Transport, detail)
    }

    pub fn model(detail: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::ModelError, detail)
    }
}

/// Result-cache failures. Never fatal for a job.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry '{key}' is corrupt: {detail}")]
    Corrupt { key: String, detail: String },
}

/// Object-store failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object '{bucket}/{object}' not found")]
    NotFound { bucket: String, object: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_failed_lists_indices() {
        let e = OcrError::JobFailed {
            failed: vec![
                FailedPage {
                    index: 1,
                    kind: InferenceErrorKind::ModelError,
                    detail: "bad page".into(),
                },
                FailedPage {
                    index: 4,
                    kind: InferenceErrorKind::Timeout,
                    detail: "deadline".into(),
                },
            ],
            total: 5,
        };
        let msg = e.to_string();
        assert!(msg.contains("2 of 5"), "got: {msg}");
        assert!(msg.contains("pages 1, 4"), "got: {msg}");
        assert_eq!(e.failed_pages(), vec![1, 4]);
    }

    #[test]
    fn only_model_errors_are_final() {
        assert!(InferenceErrorKind::Timeout.is_retryable());
        assert!(InferenceErrorKind::ConnectionRefused.is_retryable());
        assert!(InferenceErrorKind::Transport.is_retryable());
        assert!(!InferenceErrorKind::ModelError.is_retryable());
    }

    #[test]
    fn inference_error_display() {
        let e = InferenceError::connection_refused("127.0.0.1:8000");
        assert_eq!(e.to_string(), "connection refused: 127.0.0.1:8000");
    }

    #[test]
    fn cancelled_display() {
        let e = OcrError::Cancelled {
            completed: 3,
            total: 10,
        };
        assert!(e.to_string().contains("3/10"));
    }
}
