//! Shared fixtures for the integration tests: a scripted inference backend
//! and builders for small PNG / DOCX / PPTX inputs.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_ocr::job::PagePayload;
use edgequake_ocr::{
    CacheConfig, Completion, InferenceBackend, InferenceError, InferenceErrorKind,
    InferenceRequest, OcrConfig, OcrConfigBuilder,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend that answers `page {index}` (or `refined: {text}` for text units)
/// with optional per-page latency and scripted failures.
pub struct MockBackend {
    model: String,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: HashMap<usize, Duration>,
    default_latency: Duration,
    /// index → (kind, number of failing attempts before success)
    failures: HashMap<usize, (InferenceErrorKind, usize)>,
    attempts: Mutex<HashMap<usize, usize>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-ocr".to_string(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            latency: HashMap::new(),
            default_latency: Duration::ZERO,
            failures: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn model_name(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn latency(mut self, default: Duration) -> Self {
        self.default_latency = default;
        self
    }

    pub fn page_latency(mut self, index: usize, latency: Duration) -> Self {
        self.latency.insert(index, latency);
        self
    }

    /// Fail `times` attempts for `index` with `kind`; `usize::MAX` never recovers.
    pub fn failing(mut self, index: usize, kind: InferenceErrorKind, times: usize) -> Self {
        self.failures.insert(index, (kind, times));
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, index: usize) -> usize {
        self.attempts.lock().get(&index).copied().unwrap_or(0)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<Completion, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let index = request.page_index;
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(index).or_insert(0);
            *n += 1;
            *n
        };

        let latency = self.latency.get(&index).copied().unwrap_or(self.default_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(&(kind, times)) = self.failures.get(&index) {
            if attempt <= times {
                return Err(InferenceError::new(kind, format!("scripted failure on page {index}")));
            }
        }

        let text = match request.payload {
            PagePayload::Text(t) => format!("refined: {t}"),
            PagePayload::Image { .. } => format!("page {index}"),
        };
        Ok(Completion {
            text,
            prompt_tokens: 10,
            completion_tokens: 5,
        })
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config builder wired to `backend`, with fast retries and a memory cache.
pub fn config_with(backend: Arc<MockBackend>) -> OcrConfigBuilder {
    init_tracing();
    OcrConfig::builder()
        .backend(backend)
        .retry_backoff_ms(1)
        .cache(CacheConfig::default())
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([shade, shade, shade]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn zip_with(parts: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        for (name, body) in parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

/// DOCX with a Heading1 title followed by body paragraphs.
pub fn docx_bytes(title: &str, paragraphs: &[&str]) -> Vec<u8> {
    let mut body = format!(
        r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>{title}</w:t></w:r></w:p>"#
    );
    for p in paragraphs {
        body.push_str(&format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"));
    }
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );
    zip_with(&[("word/document.xml", xml)])
}

/// PPTX with one titled slide per entry.
pub fn pptx_bytes(titles: &[&str]) -> Vec<u8> {
    let parts: Vec<(String, String)> = titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
<p:sp><p:nvSpPr><p:nvPr><p:ph type="title"/></p:nvPr></p:nvSpPr><p:txBody><a:p><a:r><a:t>{title}</a:t></a:r></a:p></p:txBody></p:sp>
</p:spTree></p:cSld></p:sld>"#
                ),
            )
        })
        .collect();
    let refs: Vec<(&str, String)> = parts.iter().map(|(n, b)| (n.as_str(), b.clone())).collect();
    zip_with(&refs)
}
