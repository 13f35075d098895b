//! Result types returned by the engine.

use crate::config::OutputFormat;
use crate::error::InferenceError;
use serde::{Deserialize, Serialize};

/// Outcome of one inference call for one page unit.
///
/// Exactly one of these is recorded per page unit before a job is terminal.
/// `error` is `None` on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based page index; defines final ordering.
    pub index: usize,

    /// Raw model output (or directly-extracted text). Empty on failure.
    pub text: String,

    pub prompt_tokens: usize,
    pub completion_tokens: usize,

    /// Wall time of this page including retries.
    pub duration_ms: u64,

    /// Retries consumed (0 = first attempt succeeded).
    pub retries: u32,

    /// Set when the page failed after all retries.
    pub error: Option<InferenceError>,
}

impl PageResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Final, post-processed text of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub index: usize,
    pub text: String,
}

/// Counters for one extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionStats {
    /// Page units the adapter produced.
    pub total_pages: usize,
    /// Pages that produced text.
    pub processed_pages: usize,
    /// 0-based indices of pages left out (only under `AllowPartial`).
    pub failed_pages: Vec<usize>,
    pub total_retries: u32,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    /// Time spent turning the file into page units.
    pub prepare_duration_ms: u64,
    /// Time spent in the dispatch engine.
    pub inference_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Where a result was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub object_name: String,
    pub content_type: String,
}

/// The assembled result of `extract_text` / `describe_image`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Fresh identifier per returned document.
    pub document_id: String,

    /// Hex SHA-256 of the input bytes.
    pub fingerprint: String,

    pub filename: String,
    pub format: OutputFormat,

    /// Prompt actually sent to the model.
    pub prompt: String,

    /// Model identifier that produced the text.
    pub model: String,

    /// Per-page text in ascending page order.
    pub pages: Vec<PageText>,

    /// Pages joined with the configured separator.
    pub text: String,

    /// Served from the result cache without any inference call.
    pub from_cache: bool,

    pub stats: ExtractionStats,

    /// Set when the text was uploaded to object storage.
    pub stored: Option<StoredObject>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Whether some pages were left out under a partial-failure policy.
    pub fn is_partial(&self) -> bool {
        !self.stats.failed_pages.is_empty()
    }
}
