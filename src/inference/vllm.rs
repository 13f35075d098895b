//! OpenAI-compatible chat-completions backend for a vLLM server.
//!
//! The request is a single user turn whose content is the page image as a
//! `data:` URI followed by the prompt text. `skip_special_tokens` and
//! `vllm_xargs` are vLLM extensions carried in the request body.

use super::{classify_message, Completion, InferenceBackend, InferenceRequest};
use crate::config::OcrConfig;
use crate::error::{InferenceError, InferenceErrorKind, OcrError};
use crate::job::PagePayload;
use crate::prompts::text_refinement_message;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Direct HTTP backend.
pub struct VllmBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    vllm_xargs: Option<Value>,
}

impl VllmBackend {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| OcrError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            vllm_xargs: config.vllm_xargs.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body(&self, request: &InferenceRequest<'_>) -> Value {
        let content = match request.payload {
            PagePayload::Image { png_base64 } => json!([
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{}", png_base64) },
                },
                { "type": "text", "text": request.prompt },
            ]),
            PagePayload::Text(text) => Value::String(text_refinement_message(request.prompt, text)),
        };

        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "skip_special_tokens": request.skip_special_tokens,
        });
        if let Some(ref xargs) = self.vllm_xargs {
            body["vllm_xargs"] = xargs.clone();
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

/// Map a non-success HTTP status to an error kind.
pub(super) fn classify_status(status: StatusCode) -> InferenceErrorKind {
    match status.as_u16() {
        408 | 504 => InferenceErrorKind::Timeout,
        429 | 502 | 503 => InferenceErrorKind::Transport,
        _ => InferenceErrorKind::ModelError,
    }
}

pub(super) fn classify_reqwest(e: &reqwest::Error) -> InferenceErrorKind {
    if e.is_timeout() {
        InferenceErrorKind::Timeout
    } else if e.is_connect() {
        InferenceErrorKind::ConnectionRefused
    } else if e.is_decode() {
        InferenceErrorKind::ModelError
    } else {
        match classify_message(&e.to_string()) {
            InferenceErrorKind::ModelError => InferenceErrorKind::Transport,
            kind => kind,
        }
    }
}

fn parse_completion(raw: &str) -> Result<Completion, InferenceError> {
    let response: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| InferenceError::model(format!("unreadable response: {e}")))?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(InferenceError::model("Empty OCR response"));
    }
    let usage = response.usage.unwrap_or(Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
    });
    Ok(Completion {
        text,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    })
}

#[async_trait]
impl InferenceBackend for VllmBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<Completion, InferenceError> {
        let body = self.build_body(request);
        debug!("Page {}: POST {}", request.page_index, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::new(classify_reqwest(&e), e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| InferenceError::new(classify_reqwest(&e), e.to_string()))?;

        if !status.is_success() {
            let excerpt: String = raw.chars().take(300).collect();
            return Err(InferenceError::new(
                classify_status(status),
                format!("HTTP {}: {}", status, excerpt),
            ));
        }

        parse_completion(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> VllmBackend {
        let config = OcrConfig::builder()
            .api_base("http://gpu:8000/v1/")
            .max_tokens(512)
            .build()
            .unwrap();
        VllmBackend::new(&config).unwrap()
    }

    #[test]
    fn endpoint_joins_base() {
        assert_eq!(backend().endpoint(), "http://gpu:8000/v1/chat/completions");
    }

    #[test]
    fn image_body_shape() {
        let payload = PagePayload::Image {
            png_base64: "QUJD".into(),
        };
        let req = InferenceRequest {
            page_index: 0,
            payload: &payload,
            prompt: "<image>\nFree OCR.",
            skip_special_tokens: true,
        };
        let body = backend().build_body(&req);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image_url");
        assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,QUJD");
        assert_eq!(content[1]["text"], "<image>\nFree OCR.");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["skip_special_tokens"], true);
        assert_eq!(body["vllm_xargs"]["window_size"], 90);
        assert_eq!(body["model"], "deepseek-ai/DeepSeek-OCR");
    }

    #[test]
    fn text_body_is_plain_string() {
        let payload = PagePayload::Text("Quarterly results".into());
        let req = InferenceRequest {
            page_index: 2,
            payload: &payload,
            prompt: "<image>\nFree OCR.",
            skip_special_tokens: false,
        };
        let body = backend().build_body(&req);
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert!(content.contains("Quarterly results"));
        assert!(!content.contains("<image>"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT), InferenceErrorKind::Timeout);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            InferenceErrorKind::Transport
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            InferenceErrorKind::Transport
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), InferenceErrorKind::ModelError);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            InferenceErrorKind::ModelError
        );
    }

    #[test]
    fn parses_content_and_usage() {
        let raw = r##"{"choices":[{"message":{"role":"assistant","content":"# Title"}}],
                      "usage":{"prompt_tokens":812,"completion_tokens":4}}"##;
        let c = parse_completion(raw).unwrap();
        assert_eq!(c.text, "# Title");
        assert_eq!(c.prompt_tokens, 812);
        assert_eq!(c.completion_tokens, 4);
    }

    #[test]
    fn empty_content_is_model_error() {
        let raw = r#"{"choices":[{"message":{"content":"  "}}]}"#;
        let e = parse_completion(raw).unwrap_err();
        assert_eq!(e.kind, InferenceErrorKind::ModelError);
        assert!(e.detail.contains("Empty OCR response"));

        let e = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert_eq!(e.kind, InferenceErrorKind::ModelError);
    }
}
