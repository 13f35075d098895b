//! # edgequake-ocr
//!
//! Document OCR orchestration over OpenAI-compatible vision endpoints.
//!
//! PDFs, images and Office documents are turned into ordered page units,
//! each unit is sent to a vision model (a vLLM server by default), and the
//! per-page output is cleaned and joined into Markdown or plain text. A
//! PaddleOCR Serving endpoint can be chosen per request instead.
//! Identical requests are served from a content-addressed cache.
//!
//! ## Pipeline Overview
//!
//! ```text
//! path / URL / bytes / object
//!  │
//!  ├─ 1. Fingerprint  SHA-256 of the raw bytes → cache key (+ format, prompt, model)
//!  ├─ 2. Cache        hit → return immediately, no inference
//!  ├─ 3. Registry     pick adapter: PDF, image, DOCX, PPTX, DOC
//!  ├─ 4. Page units   rasterise (pdfium) or extract text (zip + quick-xml)
//!  ├─ 5. Dispatch     bounded concurrent inference, retries, cancellation
//!  ├─ 6. Polish       strip grounding markup, tidy whitespace, join pages
//!  └─ 7. Persist      cache complete results, optionally upload to S3/MinIO
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocr::{OcrConfig, OcrEngine, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OcrConfig::builder()
//!         .api_base("http://localhost:8000/v1")
//!         .concurrency(8)
//!         .build()?;
//!     let engine = OcrEngine::new(config)?;
//!     let doc = engine.extract_text("invoice.pdf", OutputFormat::Markdown, None).await?;
//!     println!("{}", doc.text);
//!     eprintln!("{} pages, {} retries", doc.page_count(), doc.stats.total_retries);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dococr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `s3`    | off     | [`storage::S3ObjectStore`] for AWS S3 and MinIO |
//!
//! ```toml
//! edgequake-ocr = { version = "0.1", default-features = false, features = ["s3"] }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod inference;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{DirectoryCache, MemoryCache, ResultCache};
pub use config::{
    CacheConfig, DescriptionType, FailurePolicy, OcrConfig, OcrConfigBuilder, OcrProvider,
    OutputFormat, PageSeparator,
};
pub use dispatch::CancelToken;
pub use engine::{ExtractOptions, OcrEngine};
pub use error::{FailedPage, InferenceError, InferenceErrorKind, OcrError};
pub use inference::{Completion, InferenceBackend, InferenceRequest};
pub use output::{Document, ExtractionStats, PageResult, PageText, StoredObject};
pub use pipeline::input::FilePayload;
pub use progress::{NoopProgressCallback, OcrProgressCallback, ProgressCallback};
pub use storage::{MemoryObjectStore, ObjectStore};
