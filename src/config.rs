//! Configuration types for document OCR.
//!
//! Every knob lives in [`OcrConfig`], built through [`OcrConfigBuilder`] and
//! handed to [`crate::engine::OcrEngine::new`]. Nothing is read from global
//! state; the CLI maps flags and `OCR_*` environment variables onto the
//! builder.

use crate::error::OcrError;
use crate::inference::InferenceBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the OCR engine.
///
/// # Example
/// ```rust
/// use edgequake_ocr::OcrConfig;
///
/// let config = OcrConfig::builder()
///     .api_base("http://gpu-box:8000/v1")
///     .concurrency(8)
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    // ── Inference endpoint ───────────────────────────────────────────────
    /// Base URL of the OpenAI-compatible endpoint, e.g. `http://host:8000/v1`.
    pub api_base: String,

    /// Bearer token sent to the endpoint. vLLM accepts any value by default.
    pub api_key: String,

    /// Model identifier passed in every request and recorded in cache entries.
    pub model: String,

    /// Per page-call deadline in seconds. Default: 3600.
    ///
    /// A dense page on a shared GPU can take minutes; the deadline guards
    /// against a hung server rather than a slow one.
    pub request_timeout_secs: u64,

    /// Maximum tokens generated per page. Default: 2048.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Ask the server to drop special tokens from its output. Default: false.
    ///
    /// Plain-text extraction always requests `true`; markdown extraction uses
    /// this value so grounding tokens can be kept when wanted.
    pub skip_special_tokens: bool,

    /// Extra logits-processor arguments forwarded as `vllm_xargs`.
    pub vllm_xargs: Option<serde_json::Value>,

    /// edgequake-llm provider name (`openai`, `ollama`, ...). When set, pages
    /// go through that provider instead of the vLLM HTTP backend.
    pub provider_name: Option<String>,

    /// Pre-constructed backend. Takes precedence over everything above.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// PaddleOCR Serving base URL, e.g. `http://paddle-ocr:9000`. Requests
    /// for [`OcrProvider::Paddle`] fail while this is unset.
    pub paddle_endpoint: Option<String>,

    /// Per page-call deadline for PaddleOCR in seconds. Default: 60.
    pub paddle_timeout_secs: u64,

    /// Pre-constructed PaddleOCR backend. Takes precedence over `paddle_endpoint`.
    pub paddle_backend: Option<Arc<dyn InferenceBackend>>,

    // ── Dispatch ─────────────────────────────────────────────────────────
    /// Concurrent inference calls per job (W). Default: 4.
    pub concurrency: usize,

    /// Optional ceiling on concurrent calls across all jobs of one engine.
    pub global_concurrency: Option<usize>,

    /// Retries on a transient inference failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// What to do when some pages fail. Default: [`FailurePolicy::Strict`].
    pub failure_policy: FailurePolicy,

    /// Job-level deadline in seconds. `None` means no deadline.
    pub job_timeout_secs: Option<u64>,

    // ── Adapters ─────────────────────────────────────────────────────────
    /// Rasterisation DPI for PDF pages. Range: 72–400. Default: 144.
    pub dpi: u32,

    /// Longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Documents with more pages are rejected. Default: 200.
    pub max_pages: usize,

    /// Send text pulled directly from DOCX/PPTX through the model as well.
    /// Default: false (extracted text is used as-is).
    pub refine_extracted_text: bool,

    /// LibreOffice executable used for legacy Office conversion.
    pub soffice_binary: String,

    /// Deadline for one external conversion in seconds. Default: 120.
    pub conversion_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    // ── Prompts & output ─────────────────────────────────────────────────
    /// Prompt used for markdown output when the caller gives none.
    pub prompt_markdown: String,

    /// Prompt used for plain-text output when the caller gives none.
    pub prompt_plain: String,

    /// Page separator in the assembled document. Default: blank line.
    pub page_separator: PageSeparator,

    // ── Cache & storage ──────────────────────────────────────────────────
    pub cache: CacheConfig,

    /// Upload every result to object storage even when not requested.
    pub persist_results_by_default: bool,

    /// Bucket used when the caller does not name one.
    pub default_bucket: String,

    /// Receives per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model: "deepseek-ai/DeepSeek-OCR".to_string(),
            request_timeout_secs: 3600,
            max_tokens: 2048,
            temperature: 0.0,
            skip_special_tokens: false,
            vllm_xargs: Some(default_vllm_xargs()),
            provider_name: None,
            backend: None,
            paddle_endpoint: None,
            paddle_timeout_secs: 60,
            paddle_backend: None,
            concurrency: 4,
            global_concurrency: None,
            max_retries: 3,
            retry_backoff_ms: 500,
            failure_policy: FailurePolicy::default(),
            job_timeout_secs: None,
            dpi: 144,
            max_rendered_pixels: 2000,
            max_pages: 200,
            refine_extracted_text: false,
            soffice_binary: "soffice".to_string(),
            conversion_timeout_secs: 120,
            download_timeout_secs: 120,
            prompt_markdown: crate::prompts::DEFAULT_MARKDOWN_PROMPT.to_string(),
            prompt_plain: crate::prompts::DEFAULT_PLAIN_PROMPT.to_string(),
            page_separator: PageSeparator::default(),
            cache: CacheConfig::default(),
            persist_results_by_default: false,
            default_bucket: "ocr-results".to_string(),
            progress_callback: None,
        }
    }
}

/// n-gram repetition guard used by DeepSeek-OCR; 128821/128822 are `<td>`/`</td>`.
fn default_vllm_xargs() -> serde_json::Value {
    serde_json::json!({
        "ngram_size": 30,
        "window_size": 90,
        "whitelist_token_ids": [128821, 128822],
    })
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("skip_special_tokens", &self.skip_special_tokens)
            .field("provider_name", &self.provider_name)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn InferenceBackend>"))
            .field("paddle_endpoint", &self.paddle_endpoint)
            .field("concurrency", &self.concurrency)
            .field("global_concurrency", &self.global_concurrency)
            .field("max_retries", &self.max_retries)
            .field("failure_policy", &self.failure_policy)
            .field("dpi", &self.dpi)
            .field("max_pages", &self.max_pages)
            .field("cache", &self.cache)
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// Prompt for `format` when the caller supplied none.
    pub fn default_prompt(&self, format: OutputFormat) -> &str {
        match format {
            OutputFormat::Markdown => &self.prompt_markdown,
            OutputFormat::PlainText => &self.prompt_plain,
        }
    }

    /// Whether the server should drop special tokens for `format`.
    pub fn skip_special_tokens_for(&self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::PlainText => true,
            OutputFormat::Markdown => self.skip_special_tokens,
        }
    }
}

/// Builder for [`OcrConfig`].
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl fmt::Debug for OcrConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl OcrConfigBuilder {
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.config.api_base = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn skip_special_tokens(mut self, v: bool) -> Self {
        self.config.skip_special_tokens = v;
        self
    }

    pub fn vllm_xargs(mut self, xargs: Option<serde_json::Value>) -> Self {
        self.config.vllm_xargs = xargs;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn paddle_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.paddle_endpoint = Some(url.into());
        self
    }

    pub fn paddle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.paddle_timeout_secs = secs.max(1);
        self
    }

    pub fn paddle_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.paddle_backend = Some(backend);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn global_concurrency(mut self, n: usize) -> Self {
        self.config.global_concurrency = Some(n.max(1));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.job_timeout_secs = Some(secs);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn refine_extracted_text(mut self, v: bool) -> Self {
        self.config.refine_extracted_text = v;
        self
    }

    pub fn soffice_binary(mut self, path: impl Into<String>) -> Self {
        self.config.soffice_binary = path.into();
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn prompt_markdown(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt_markdown = prompt.into();
        self
    }

    pub fn prompt_plain(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt_plain = prompt.into();
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn persist_results_by_default(mut self, v: bool) -> Self {
        self.config.persist_results_by_default = v;
        self
    }

    pub fn default_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.default_bucket = bucket.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(OcrError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(OcrError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_pages == 0 {
            return Err(OcrError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.backend.is_none() && c.provider_name.is_none() {
            let base = c.api_base.trim();
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(OcrError::InvalidConfig(format!(
                    "api_base must be an http(s) URL, got '{}'",
                    c.api_base
                )));
            }
        }
        if let Some(ref paddle) = c.paddle_endpoint {
            let base = paddle.trim();
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(OcrError::InvalidConfig(format!(
                    "paddle_endpoint must be an http(s) URL, got '{}'",
                    paddle
                )));
            }
        }
        if c.cache.enabled && c.cache.capacity == 0 {
            return Err(OcrError::InvalidConfig(
                "cache capacity must be ≥ 1 when the cache is enabled".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Text flavour requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Markdown,
    PlainText,
}

impl OutputFormat {
    /// MIME type used when the result is persisted.
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "text/markdown",
            OutputFormat::PlainText => "text/plain",
        }
    }

    /// File extension used for persisted results.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::PlainText => "txt",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::PlainText => "plain_text",
        }
    }
}

/// OCR engine a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrProvider {
    /// The vision model behind the configured backend.
    #[default]
    DeepSeek,
    /// A PaddleOCR Serving endpoint. Prompts are ignored.
    Paddle,
}

impl OcrProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OcrProvider::DeepSeek => "deepseek",
            OcrProvider::Paddle => "paddle",
        }
    }
}

impl fmt::Display for OcrProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much detail `describe_image` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionType {
    /// Every visible element, including transcribed text.
    #[default]
    Full,
    /// A thorough description without full transcription.
    Detailed,
    /// One or two sentences.
    Concise,
}

/// Outcome when some pages of a job fail.
///
/// | Policy | Result |
/// |--------|--------|
/// | `Strict` | [`OcrError::JobFailed`] listing every failed page (default) |
/// | `AllowPartial` | document with failed pages left out and listed in `stats.failed_pages`; never cached |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    #[default]
    Strict,
    AllowPartial,
}

/// Result-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Consult and fill the cache. Default: true.
    pub enabled: bool,
    /// Maximum entries held in memory (least recently used evicted). Default: 256.
    pub capacity: usize,
    /// Entries older than this are treated as misses. Default: no expiry.
    pub ttl_secs: Option<u64>,
    /// Persist entries as JSON files under this directory instead of memory.
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
            ttl_secs: None,
            directory: None,
        }
    }
}

impl CacheConfig {
    /// Cache switched off entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// How to separate pages in the assembled output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line between pages: "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the page numbered `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_settings() {
        let c = OcrConfig::default();
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.request_timeout_secs, 3600);
        assert_eq!(c.max_tokens, 2048);
        assert_eq!(c.dpi, 144);
        assert_eq!(c.max_pages, 200);
        assert_eq!(c.model, "deepseek-ai/DeepSeek-OCR");
        assert_eq!(c.failure_policy, FailurePolicy::Strict);
        let xargs = c.vllm_xargs.expect("xargs default");
        assert_eq!(xargs["ngram_size"], 30);
    }

    #[test]
    fn builder_clamps() {
        let c = OcrConfig::builder()
            .dpi(1000)
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn build_rejects_bad_api_base() {
        let err = OcrConfig::builder().api_base("localhost:8000").build();
        assert!(matches!(err, Err(OcrError::InvalidConfig(_))));
    }

    #[test]
    fn build_rejects_zero_cache_capacity() {
        let cache = CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        };
        assert!(OcrConfig::builder().cache(cache).build().is_err());
        let off = CacheConfig {
            capacity: 0,
            ..CacheConfig::disabled()
        };
        assert!(OcrConfig::builder().cache(off).build().is_ok());
    }

    #[test]
    fn plain_text_always_skips_special_tokens() {
        let c = OcrConfig::default();
        assert!(c.skip_special_tokens_for(OutputFormat::PlainText));
        assert!(!c.skip_special_tokens_for(OutputFormat::Markdown));
    }

    #[test]
    fn default_prompt_per_format() {
        let c = OcrConfig::default();
        assert!(c.default_prompt(OutputFormat::Markdown).contains("markdown"));
        assert!(c.default_prompt(OutputFormat::PlainText).contains("Free OCR"));
    }

    #[test]
    fn separator_render() {
        assert_eq!(PageSeparator::None.render(2), "\n\n");
        assert_eq!(PageSeparator::Comment.render(3), "\n\n<!-- page 3 -->\n\n");
        assert_eq!(
            PageSeparator::Custom("***".into()).render(1),
            "\n\n***\n\n"
        );
    }

    #[test]
    fn paddle_endpoint_must_be_http() {
        assert!(OcrConfig::builder()
            .paddle_endpoint("paddle-ocr:9000")
            .build()
            .is_err());
        let c = OcrConfig::builder()
            .paddle_endpoint("http://paddle-ocr:9000")
            .build()
            .unwrap();
        assert_eq!(c.paddle_timeout_secs, 60);
        assert_eq!(
            serde_json::to_string(&OcrProvider::Paddle).unwrap(),
            "\"paddle\""
        );
    }

    #[test]
    fn output_format_serde_names() {
        let json = serde_json::to_string(&OutputFormat::PlainText).unwrap();
        assert_eq!(json, "\"plain_text\"");
        assert_eq!(OutputFormat::Markdown.extension(), "md");
    }
}
