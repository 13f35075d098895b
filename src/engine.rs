//! The facade: fingerprint → cache → registry → dispatch → post-process →
//! cache write → optional upload.

use crate::cache::{self, CachedDocument, ResultCache};
use crate::config::{DescriptionType, OcrConfig, OcrProvider, OutputFormat};
use crate::dispatch::{CancelToken, Dispatcher};
use crate::error::{FailedPage, OcrError};
use crate::fingerprint::{self, CacheKey};
use crate::inference::InferenceClient;
use crate::job::DocumentJob;
use crate::output::{Document, ExtractionStats, PageText, StoredObject};
use crate::pipeline::input::{self, FilePayload};
use crate::pipeline::postprocess;
use crate::pipeline::registry::{self, Adapter};
use crate::prompts;
use crate::storage::{self, ObjectStore};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Per-call options for the extraction operations.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub format: OutputFormat,
    /// Overrides the configured prompt for `format`.
    pub prompt: Option<String>,
    /// OCR engine for this request.
    pub provider: OcrProvider,
    /// Upload the result. `None` follows `persist_results_by_default`.
    pub store_result: Option<bool>,
    /// Target bucket; defaults to `default_bucket`.
    pub bucket: Option<String>,
    /// Target object name; defaults to `ocr/{stem}-{8 hex}.{ext}`.
    pub object_name: Option<String>,
}

impl ExtractOptions {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_provider(mut self, provider: OcrProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn store(mut self, store: bool) -> Self {
        self.store_result = Some(store);
        self
    }
}

/// Resolved parameters of one job.
struct JobSpec {
    provider: OcrProvider,
    format: OutputFormat,
    prompt: String,
    skip_special_tokens: bool,
    store: bool,
    bucket: Option<String>,
    object_name: Option<String>,
}

/// Document OCR engine.
///
/// Cheap to share behind an `Arc`; concurrent calls share the result cache
/// and, when `global_concurrency` is set, one concurrency ceiling.
///
/// # Example
/// ```rust,no_run
/// use edgequake_ocr::{OcrConfig, OcrEngine, OutputFormat};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = OcrEngine::new(OcrConfig::builder().api_base("http://gpu:8000/v1").build()?)?;
/// let doc = engine.extract_text("scan.pdf", OutputFormat::Markdown, None).await?;
/// println!("{}", doc.text);
/// # Ok(())
/// # }
/// ```
pub struct OcrEngine {
    config: OcrConfig,
    dispatcher: Dispatcher,
    paddle: Option<Dispatcher>,
    cache: Option<Arc<dyn ResultCache>>,
    storage: Option<Arc<dyn ObjectStore>>,
}

impl OcrEngine {
    pub fn new(config: OcrConfig) -> Result<Self, OcrError> {
        let global = config
            .global_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let build = |client: InferenceClient| {
            let dispatcher = Dispatcher::new(client, config.concurrency)
                .with_policy(config.failure_policy)
                .with_job_timeout(config.job_timeout_secs.map(Duration::from_secs))
                .with_progress(config.progress_callback.clone());
            match global {
                Some(ref limit) => dispatcher.with_global_limit(Arc::clone(limit)),
                None => dispatcher,
            }
        };
        let dispatcher = build(InferenceClient::from_config(&config)?);
        let paddle = InferenceClient::paddle_from_config(&config)?.map(build);
        let cache = cache::from_config(&config.cache);

        Ok(Self {
            config,
            dispatcher,
            paddle,
            cache,
            storage: None,
        })
    }

    /// Replace the configured cache store.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Model identifier results are produced with.
    pub fn model(&self) -> &str {
        self.dispatcher.client().model()
    }

    fn dispatcher_for(&self, provider: OcrProvider) -> Result<&Dispatcher, OcrError> {
        match provider {
            OcrProvider::DeepSeek => Ok(&self.dispatcher),
            OcrProvider::Paddle => self.paddle.as_ref().ok_or_else(|| {
                OcrError::ProviderNotConfigured {
                    provider: provider.to_string(),
                    hint: "Set paddle_endpoint (OCR_PADDLE_ENDPOINT) to a PaddleOCR Serving URL."
                        .into(),
                }
            }),
        }
    }

    // ── Public operations ────────────────────────────────────────────────

    /// Extract text from a local file or HTTP(S) URL.
    pub async fn extract_text(
        &self,
        input: &str,
        format: OutputFormat,
        prompt: Option<&str>,
    ) -> Result<Document, OcrError> {
        let mut options = ExtractOptions::new(format);
        options.prompt = prompt.map(str::to_string);
        self.extract_text_with_cancel(input, &options, &CancelToken::new())
            .await
    }

    /// [`OcrEngine::extract_text`] with full options and a cancellation token.
    pub async fn extract_text_with_cancel(
        &self,
        input: &str,
        options: &ExtractOptions,
        cancel: &CancelToken,
    ) -> Result<Document, OcrError> {
        let payload = input::resolve_input(input, self.config.download_timeout_secs).await?;
        self.extract_payload(payload, options, cancel).await
    }

    /// Extract text from bytes already in memory.
    pub async fn extract_bytes(
        &self,
        payload: FilePayload,
        options: &ExtractOptions,
    ) -> Result<Document, OcrError> {
        self.extract_payload(payload, options, &CancelToken::new())
            .await
    }

    /// Fetch `bucket/object_name` from the attached store and extract it.
    pub async fn extract_from_storage(
        &self,
        bucket: &str,
        object_name: &str,
        options: &ExtractOptions,
    ) -> Result<Document, OcrError> {
        let store = self.storage.as_ref().ok_or(OcrError::StorageNotConfigured)?;
        let data = store.get(bucket, object_name).await?;
        info!("Fetched {}/{} ({} bytes)", bucket, object_name, data.len());
        let payload = FilePayload::new(input::filename_from_object(object_name), None, data);
        self.extract_payload(payload, options, &CancelToken::new())
            .await
    }

    /// Describe an image. Non-image inputs fail with `UnsupportedFileType`.
    pub async fn describe_image(
        &self,
        input: &str,
        kind: DescriptionType,
    ) -> Result<Document, OcrError> {
        let payload = input::resolve_input(input, self.config.download_timeout_secs).await?;
        self.describe_image_bytes(payload, kind).await
    }

    pub async fn describe_image_bytes(
        &self,
        payload: FilePayload,
        kind: DescriptionType,
    ) -> Result<Document, OcrError> {
        let adapter = registry::select(&payload)?;
        if adapter != Adapter::Image {
            return Err(OcrError::UnsupportedFileType {
                detail: format!(
                    "describe_image accepts images only, '{}' is {}",
                    payload.filename, adapter
                ),
            });
        }
        let spec = JobSpec {
            provider: OcrProvider::DeepSeek,
            format: OutputFormat::Markdown,
            prompt: prompts::description_prompt(kind).to_string(),
            skip_special_tokens: true,
            store: false,
            bucket: None,
            object_name: None,
        };
        self.run(payload, adapter, spec, &CancelToken::new()).await
    }

    /// Extract and write the text to `output_path` atomically.
    pub async fn extract_text_to_file(
        &self,
        input: &str,
        output_path: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> Result<Document, OcrError> {
        let doc = self
            .extract_text_with_cancel(input, options, &CancelToken::new())
            .await?;
        write_atomic(output_path.as_ref(), &doc.text).await?;
        Ok(doc)
    }

    /// Presigned GET URL for a stored result.
    pub async fn presign_result(
        &self,
        stored: &StoredObject,
        expires_in: Duration,
    ) -> Result<String, OcrError> {
        let store = self.storage.as_ref().ok_or(OcrError::StorageNotConfigured)?;
        Ok(store
            .presign_get(&stored.bucket, &stored.object_name, expires_in)
            .await?)
    }

    // ── Core ─────────────────────────────────────────────────────────────

    async fn extract_payload(
        &self,
        payload: FilePayload,
        options: &ExtractOptions,
        cancel: &CancelToken,
    ) -> Result<Document, OcrError> {
        let adapter = registry::select(&payload)?;
        let prompt = options
            .prompt
            .clone()
            .unwrap_or_else(|| self.config.default_prompt(options.format).to_string());
        let spec = JobSpec {
            provider: options.provider,
            format: options.format,
            prompt,
            skip_special_tokens: self.config.skip_special_tokens_for(options.format),
            store: options
                .store_result
                .unwrap_or(self.config.persist_results_by_default),
            bucket: options.bucket.clone(),
            object_name: options.object_name.clone(),
        };
        self.run(payload, adapter, spec, cancel).await
    }

    async fn run(
        &self,
        payload: FilePayload,
        adapter: Adapter,
        spec: JobSpec,
        cancel: &CancelToken,
    ) -> Result<Document, OcrError> {
        let start = Instant::now();
        let dispatcher = self.dispatcher_for(spec.provider)?;
        let model = dispatcher.client().model().to_string();
        let fp = fingerprint::fingerprint(&payload.data);
        let key = CacheKey::new(fp.clone(), spec.format, &spec.prompt, &model);
        info!(
            "Extracting '{}' ({}, {} bytes, fp {}) via {}",
            payload.filename,
            adapter,
            payload.data.len(),
            fingerprint::short(&fp),
            spec.provider
        );

        // ── Cache lookup ─────────────────────────────────────────────────
        if let Some(hit) = self.cache_get(&key).await {
            info!("Cache hit for {}", key);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_cache_hit(&fp);
            }
            let stats = ExtractionStats {
                total_pages: hit.pages.len(),
                processed_pages: hit.pages.len(),
                total_duration_ms: start.elapsed().as_millis() as u64,
                ..ExtractionStats::default()
            };
            let mut doc = Document {
                document_id: uuid::Uuid::new_v4().to_string(),
                fingerprint: fp,
                filename: payload.filename.clone(),
                format: spec.format,
                prompt: spec.prompt.clone(),
                text: postprocess::assemble(&hit.pages, &self.config.page_separator),
                model: hit.model,
                pages: hit.pages,
                from_cache: true,
                stats,
                stored: None,
            };
            doc.stored = self.store_if_requested(&payload, &spec, &doc.text).await?;
            return Ok(doc);
        }

        // ── Page units ───────────────────────────────────────────────────
        let prepare_start = Instant::now();
        let units = registry::to_page_units(adapter, &payload, &self.config, spec.format).await?;
        let prepare_duration_ms = prepare_start.elapsed().as_millis() as u64;
        let total = units.len();

        // ── Dispatch ─────────────────────────────────────────────────────
        let mut job = DocumentJob::new(
            fp.clone(),
            payload.filename.clone(),
            spec.format,
            spec.prompt.clone(),
            units,
        );
        let inference_start = Instant::now();
        let results = dispatcher
            .run(&mut job, spec.skip_special_tokens, cancel)
            .await?;
        let inference_duration_ms = inference_start.elapsed().as_millis() as u64;
        debug!("Job for {} finished as {:?}", key, job.status());

        // ── Post-process ─────────────────────────────────────────────────
        let failed: Vec<FailedPage> = results
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|e| FailedPage {
                    index: r.index,
                    kind: e.kind,
                    detail: e.detail.clone(),
                })
            })
            .collect();
        if failed.len() == total {
            return Err(OcrError::JobFailed { failed, total });
        }

        let pages: Vec<PageText> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| PageText {
                index: r.index,
                text: postprocess::clean_page(&r.text, spec.format),
            })
            .collect();
        let text = postprocess::assemble(&pages, &self.config.page_separator);

        let stats = ExtractionStats {
            total_pages: total,
            processed_pages: pages.len(),
            failed_pages: failed.iter().map(|f| f.index).collect(),
            total_retries: results.iter().map(|r| r.retries).sum(),
            total_prompt_tokens: results.iter().map(|r| r.prompt_tokens as u64).sum(),
            total_completion_tokens: results.iter().map(|r| r.completion_tokens as u64).sum(),
            prepare_duration_ms,
            inference_duration_ms,
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        // ── Cache write (complete documents only) ────────────────────────
        if failed.is_empty() {
            self.cache_put(
                &key,
                CachedDocument {
                    format: spec.format,
                    prompt: spec.prompt.clone(),
                    model: model.clone(),
                    pages: pages.clone(),
                    created_at: Utc::now(),
                },
            )
            .await;
        } else {
            warn!(
                "Partial result for {} ({} pages missing); not cached",
                key,
                failed.len()
            );
        }

        let stored = self.store_if_requested(&payload, &spec, &text).await?;

        info!(
            "Extraction complete: {}/{} pages, {}ms total",
            stats.processed_pages, total, stats.total_duration_ms
        );

        Ok(Document {
            document_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: fp,
            filename: payload.filename,
            format: spec.format,
            prompt: spec.prompt,
            model,
            pages,
            text,
            from_cache: false,
            stats,
            stored,
        })
    }

    async fn cache_get(&self, key: &CacheKey) -> Option<CachedDocument> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read failed for {}: {}; treating as miss", key, e);
                None
            }
        }
    }

    async fn cache_put(&self, key: &CacheKey, doc: CachedDocument) {
        if let Some(ref cache) = self.cache {
            match cache.put(key, doc).await {
                Ok(()) => debug!("Cached {}", key),
                Err(e) => warn!("Cache write failed for {}: {}", key, e),
            }
        }
    }

    async fn store_if_requested(
        &self,
        payload: &FilePayload,
        spec: &JobSpec,
        text: &str,
    ) -> Result<Option<StoredObject>, OcrError> {
        if !spec.store {
            return Ok(None);
        }
        let store = self.storage.as_ref().ok_or(OcrError::StorageNotConfigured)?;
        let bucket = spec
            .bucket
            .clone()
            .unwrap_or_else(|| self.config.default_bucket.clone());
        let object_name = spec
            .object_name
            .clone()
            .unwrap_or_else(|| storage::result_object_name(payload.stem(), spec.format));
        let content_type = spec.format.content_type();

        store
            .put(&bucket, &object_name, text.as_bytes().to_vec(), content_type)
            .await?;
        info!("Stored result at {}/{}", bucket, object_name);

        Ok(Some(StoredObject {
            bucket,
            object_name,
            content_type: content_type.to_string(),
        }))
    }
}

/// Write via temp file + rename so readers never see a partial file.
async fn write_atomic(path: &Path, text: &str) -> Result<(), OcrError> {
    let write_failed = |source| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, text).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}
