//! PaddleOCR Serving backend.
//!
//! One `POST {endpoint}/predict/ocr_system` per page with body
//! `{"image": "<base64 png>"}`. Deployments answer in a few shapes; all of
//! these are accepted:
//!
//! ```text
//! {"text": "..."}
//! {"result": "..."}             {"result": [[{"text": "..."}, ...]]}
//! ["...", ...]                  [{"text": "..."}, ...]
//! ```
//!
//! PaddleOCR takes no prompt and reports no token usage. Text page units
//! are returned unchanged.

use super::vllm::{classify_reqwest, classify_status};
use super::{Completion, InferenceBackend, InferenceRequest};
use crate::config::OcrConfig;
use crate::error::{InferenceError, OcrError};
use crate::job::PagePayload;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Model identifier recorded for PaddleOCR results.
pub const PADDLE_MODEL: &str = "paddleocr";

pub struct PaddleBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl PaddleBackend {
    /// Backend for `config.paddle_endpoint`.
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let base = config
            .paddle_endpoint
            .as_deref()
            .ok_or_else(|| OcrError::ProviderNotConfigured {
                provider: "paddle".into(),
                hint: "Set paddle_endpoint (OCR_PADDLE_ENDPOINT) to a PaddleOCR Serving URL.".into(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.paddle_timeout_secs))
            .build()
            .map_err(|e| OcrError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/predict/ocr_system", base.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Pull the recognised text out of a PaddleOCR response body.
fn parse_response(raw: &str) -> Result<String, InferenceError> {
    let data: Value = serde_json::from_str(raw)
        .map_err(|e| InferenceError::model(format!("unreadable PaddleOCR response: {e}")))?;

    let text = match &data {
        Value::Object(map) if map.contains_key("text") => map.get("text").map(flatten),
        Value::Object(map) if map.contains_key("result") => map.get("result").map(flatten),
        Value::Array(items) => items.first().map(flatten),
        _ => None,
    };
    text.ok_or_else(|| InferenceError::model("Unexpected PaddleOCR response format"))
}

/// Strings as-is; arrays as their `text` lines; anything else as JSON.
fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(_) => {
            let mut lines = Vec::new();
            collect_text(value, &mut lines);
            if lines.is_empty() {
                value.to_string()
            } else {
                lines.join("\n")
            }
        }
        Value::Object(map) => match map.get("text") {
            Some(Value::String(s)) => s.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("text") {
                out.push(s.clone());
            }
        }
        _ => {}
    }
}

#[async_trait]
impl InferenceBackend for PaddleBackend {
    fn model(&self) -> &str {
        PADDLE_MODEL
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<Completion, InferenceError> {
        let png_base64 = match request.payload {
            PagePayload::Image { png_base64 } => png_base64,
            PagePayload::Text(text) => {
                return Ok(Completion {
                    text: text.clone(),
                    ..Completion::default()
                })
            }
        };
        debug!("Page {}: POST {}", request.page_index, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "image": png_base64 }))
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
                format!("PaddleOCR HTTP {}: {}", status, excerpt),
            ));
        }

        Ok(Completion {
            text: parse_response(&raw)?,
            ..Completion::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceErrorKind;

    #[test]
    fn endpoint_appends_predict_path() {
        let config = OcrConfig::builder()
            .paddle_endpoint("http://paddle-ocr:9000/")
            .build()
            .unwrap();
        assert_eq!(
            PaddleBackend::new(&config).unwrap().endpoint(),
            "http://paddle-ocr:9000/predict/ocr_system"
        );
    }

    #[test]
    fn missing_endpoint_is_not_configured() {
        let err = PaddleBackend::new(&OcrConfig::default()).err().unwrap();
        assert!(matches!(err, OcrError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn text_field() {
        assert_eq!(parse_response(r#"{"text":"Invoice 42"}"#).unwrap(), "Invoice 42");
    }

    #[test]
    fn result_string_and_nested_lines() {
        assert_eq!(parse_response(r#"{"result":"line"}"#).unwrap(), "line");
        let nested = r#"{"result":[[{"text":"Total","confidence":0.98},{"text":"12.00","confidence":0.91}]]}"#;
        assert_eq!(parse_response(nested).unwrap(), "Total\n12.00");
    }

    #[test]
    fn list_takes_first_entry() {
        assert_eq!(parse_response(r#"["first page","second"]"#).unwrap(), "first page");
        assert_eq!(parse_response(r#"[{"text":"boxed"}]"#).unwrap(), "boxed");
    }

    #[test]
    fn unknown_shapes_are_model_errors() {
        for raw in [r#"{"status":"ok"}"#, "[]", "42", "not json"] {
            let e = parse_response(raw).unwrap_err();
            assert_eq!(e.kind, InferenceErrorKind::ModelError, "{raw}");
        }
    }

    #[tokio::test]
    async fn text_units_skip_the_endpoint() {
        let config = OcrConfig::builder()
            .paddle_endpoint("http://127.0.0.1:9")
            .build()
            .unwrap();
        let payload = PagePayload::Text("Slide".into());
        let request = InferenceRequest {
            page_index: 0,
            payload: &payload,
            prompt: "ignored",
            skip_special_tokens: false,
        };
        let c = PaddleBackend::new(&config).unwrap().complete(&request).await.unwrap();
        assert_eq!(c.text, "Slide");
        assert_eq!(c.prompt_tokens, 0);
    }
}
