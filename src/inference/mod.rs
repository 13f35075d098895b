//! Inference client: one page unit in, one [`PageResult`] out.
//!
//! The wire protocol lives behind [`InferenceBackend`]:
//!
//! * [`vllm::VllmBackend`] talks to an OpenAI-compatible chat-completions
//!   endpoint directly (the default; it needs vLLM-only request fields).
//! * [`provider::ProviderBackend`] routes through any edgequake-llm provider.
//! * [`paddle::PaddleBackend`] posts page images to a PaddleOCR Serving
//!   endpoint, selected per request with [`crate::config::OcrProvider::Paddle`].
//!
//! [`InferenceClient`] owns the per-page policy on top of a backend: the
//! per-call deadline and the retry loop. It never looks at other pages.
//!
//! ## Retry Strategy
//!
//! Timeouts, refused connections and other transport failures are retried
//! with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`, capped at
//! [`MAX_BACKOFF_MS`]): with the defaults the waits are 500 ms, 1 s, 2 s. A
//! [`InferenceErrorKind::ModelError`] is returned after the first attempt.

pub mod paddle;
pub mod provider;
pub mod vllm;

use crate::config::OcrConfig;
use crate::error::{InferenceError, InferenceErrorKind, OcrError};
use crate::job::{PagePayload, PageUnit};
use crate::output::PageResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Upper bound on a single retry wait.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// One request as seen by a backend.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub page_index: usize,
    pub payload: &'a PagePayload,
    pub prompt: &'a str,
    pub skip_special_tokens: bool,
}

/// Generated text plus token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// A single call to a remote model.
///
/// Implementations issue exactly one request per `complete` call and
/// classify failures; retries belong to [`InferenceClient`].
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Model identifier, recorded in results and cache entries.
    fn model(&self) -> &str;

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<Completion, InferenceError>;
}

/// Per-page retry and deadline policy around a backend.
#[derive(Clone)]
pub struct InferenceClient {
    backend: Arc<dyn InferenceBackend>,
    max_retries: u32,
    retry_backoff_ms: u64,
    request_timeout: Duration,
    refine_text: bool,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: &OcrConfig) -> Self {
        Self {
            backend,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            refine_text: config.refine_extracted_text,
        }
    }

    /// Build the client for `config`, resolving the backend from most to
    /// least specific:
    ///
    /// 1. `config.backend`: a pre-built backend, used as-is.
    /// 2. `config.provider_name`: an edgequake-llm provider for `config.model`.
    /// 3. The vLLM HTTP backend at `config.api_base`.
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        let backend: Arc<dyn InferenceBackend> = if let Some(ref backend) = config.backend {
            Arc::clone(backend)
        } else if let Some(ref name) = config.provider_name {
            info!("Using edgequake-llm provider '{}' ({})", name, config.model);
            Arc::new(provider::ProviderBackend::from_factory(name, config)?)
        } else {
            debug!("Using vLLM backend at {}", config.api_base);
            Arc::new(vllm::VllmBackend::new(config)?)
        };
        Ok(Self::new(backend, config))
    }

    /// Client for the PaddleOCR backend, or `None` when neither
    /// `paddle_backend` nor `paddle_endpoint` is configured.
    pub fn paddle_from_config(config: &OcrConfig) -> Result<Option<Self>, OcrError> {
        let backend: Arc<dyn InferenceBackend> =
            match (&config.paddle_backend, &config.paddle_endpoint) {
                (Some(backend), _) => Arc::clone(backend),
                (None, Some(endpoint)) => {
                    info!("PaddleOCR available at {}", endpoint);
                    Arc::new(paddle::PaddleBackend::new(config)?)
                }
                (None, None) => return Ok(None),
            };
        let mut client = Self::new(backend, config);
        client.request_timeout = Duration::from_secs(config.paddle_timeout_secs);
        Ok(Some(client))
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Whether `payload` needs a model call at all.
    pub fn needs_backend(&self, payload: &PagePayload) -> bool {
        !payload.is_text() || self.refine_text
    }

    /// Wait before retry number `attempt` (1-based).
    fn backoff_ms(&self, attempt: u32) -> u64 {
        2u64.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.retry_backoff_ms.checked_mul(factor))
            .map_or(MAX_BACKOFF_MS, |ms| ms.min(MAX_BACKOFF_MS))
    }

    /// Run one page unit through the backend with retries.
    ///
    /// Always returns a `PageResult`; a failure is recorded in `error`
    /// rather than propagated, so one bad page never aborts its siblings.
    pub async fn infer(&self, unit: &PageUnit, prompt: &str, skip_special_tokens: bool) -> PageResult {
        let start = Instant::now();

        if !self.needs_backend(&unit.payload) {
            if let PagePayload::Text(ref text) = unit.payload {
                debug!("Page {}: using extracted text ({} chars)", unit.index, text.len());
                return PageResult {
                    index: unit.index,
                    text: text.clone(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries: 0,
                    error: None,
                };
            }
        }

        let request = InferenceRequest {
            page_index: unit.index,
            payload: &unit.payload,
            prompt,
            skip_special_tokens,
        };

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let backoff = self.backoff_ms(attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    unit.index, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let outcome = match timeout(self.request_timeout, self.backend.complete(&request)).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::timeout(format!(
                    "no response within {}s",
                    self.request_timeout.as_secs()
                ))),
            };

            match outcome {
                Ok(completion) => {
                    let duration = start.elapsed();
                    debug!(
                        "Page {}: {} prompt tokens, {} completion tokens, {:?}",
                        unit.index, completion.prompt_tokens, completion.completion_tokens, duration
                    );
                    return PageResult {
                        index: unit.index,
                        text: completion.text,
                        prompt_tokens: completion.prompt_tokens,
                        completion_tokens: completion.completion_tokens,
                        duration_ms: duration.as_millis() as u64,
                        retries: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    warn!("Page {}: attempt {} failed: {}", unit.index, attempt + 1, e);
                    if !e.kind.is_retryable() || attempt >= self.max_retries {
                        return PageResult {
                            index: unit.index,
                            text: String::new(),
                            prompt_tokens: 0,
                            completion_tokens: 0,
                            duration_ms: start.elapsed().as_millis() as u64,
                            retries: attempt,
                            error: Some(e),
                        };
                    }
                }
            }
            attempt += 1;
        }
    }
}

/// Classify a failure from its message when no structured status exists.
pub(crate) fn classify_message(message: &str) -> InferenceErrorKind {
    let m = message.to_ascii_lowercase();
    if m.contains("timed out") || m.contains("timeout") {
        InferenceErrorKind::Timeout
    } else if m.contains("connection refused") || m.contains("error trying to connect") {
        InferenceErrorKind::ConnectionRefused
    } else if m.contains("429")
        || m.contains("rate limit")
        || m.contains("502")
        || m.contains("503")
        || m.contains("connection reset")
        || m.contains("network")
    {
        InferenceErrorKind::Transport
    } else {
        InferenceErrorKind::ModelError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        replies: Mutex<VecDeque<Result<Completion, InferenceError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Completion, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InferenceBackend for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _r: &InferenceRequest<'_>) -> Result<Completion, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::model("script exhausted")))
        }
    }

    fn ok(text: &str) -> Result<Completion, InferenceError> {
        Ok(Completion {
            text: text.into(),
            prompt_tokens: 10,
            completion_tokens: 3,
        })
    }

    fn client(backend: Arc<dyn InferenceBackend>) -> InferenceClient {
        let config = OcrConfig::builder()
            .max_retries(3)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        InferenceClient::new(backend, &config)
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let backend = Scripted::new(vec![
            Err(InferenceError::connection_refused("down")),
            Err(InferenceError::timeout("slow")),
            ok("text"),
        ]);
        let result = client(backend.clone())
            .infer(&PageUnit::image(0, "AAAA".into()), "p", false)
            .await;
        assert!(result.is_success());
        assert_eq!(result.text, "text");
        assert_eq!(result.retries, 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn model_error_is_not_retried() {
        let backend = Scripted::new(vec![Err(InferenceError::model("bad page")), ok("never")]);
        let result = client(backend.clone())
            .infer(&PageUnit::image(3, "AAAA".into()), "p", false)
            .await;
        assert_eq!(result.index, 3);
        assert_eq!(result.error.unwrap().kind, InferenceErrorKind::ModelError);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let backend = Scripted::new(
            (0..10)
                .map(|_| Err(InferenceError::transport("503")))
                .collect(),
        );
        let result = client(backend.clone())
            .infer(&PageUnit::image(0, "AAAA".into()), "p", false)
            .await;
        assert_eq!(result.error.unwrap().kind, InferenceErrorKind::Transport);
        assert_eq!(result.retries, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn extracted_text_skips_the_backend() {
        let backend = Scripted::new(vec![]);
        let result = client(backend.clone())
            .infer(&PageUnit::text(1, "Slide title"), "p", false)
            .await;
        assert_eq!(result.text, "Slide title");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let config = OcrConfig::builder()
            .max_retries(200)
            .retry_backoff_ms(500)
            .build()
            .unwrap();
        let client = InferenceClient::new(Scripted::new(vec![]), &config);
        assert_eq!(client.backoff_ms(1), 500);
        assert_eq!(client.backoff_ms(2), 1_000);
        assert_eq!(client.backoff_ms(3), 2_000);
        assert_eq!(client.backoff_ms(60), MAX_BACKOFF_MS);
        assert_eq!(client.backoff_ms(200), MAX_BACKOFF_MS);
    }

    #[test]
    fn message_classification() {
        assert_eq!(classify_message("request timed out"), InferenceErrorKind::Timeout);
        assert_eq!(
            classify_message("tcp connect error: Connection refused (os error 111)"),
            InferenceErrorKind::ConnectionRefused
        );
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), InferenceErrorKind::Transport);
        assert_eq!(classify_message("invalid image"), InferenceErrorKind::ModelError);
    }
}
