//! Backend over an edgequake-llm provider (OpenAI, Anthropic, Gemini,
//! Ollama, LM Studio, ...).
//!
//! vLLM-only fields (`skip_special_tokens`, `vllm_xargs`) have no equivalent
//! here and are dropped.

use super::{classify_message, Completion, InferenceBackend, InferenceRequest};
use crate::config::OcrConfig;
use crate::error::{InferenceError, OcrError};
use crate::job::PagePayload;
use crate::prompts::text_refinement_message;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;

pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: CompletionOptions,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &OcrConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            options: build_options(config),
        }
    }

    /// Instantiate `provider_name` through [`ProviderFactory`]; the API key is
    /// read from that provider's usual environment variable.
    pub fn from_factory(provider_name: &str, config: &OcrConfig) -> Result<Self, OcrError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, &config.model).map_err(
            |e| OcrError::ProviderNotConfigured {
                provider: provider_name.to_string(),
                hint: format!("{e}"),
            },
        )?;
        Ok(Self::new(provider, config))
    }
}

fn build_options(config: &OcrConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn build_messages(request: &InferenceRequest<'_>) -> Vec<ChatMessage> {
    match request.payload {
        PagePayload::Image { png_base64 } => vec![ChatMessage::user_with_images(
            request.prompt,
            vec![ImageData::new(png_base64.clone(), "image/png")],
        )],
        PagePayload::Text(text) => {
            vec![ChatMessage::user(text_refinement_message(request.prompt, text))]
        }
    }
}

#[async_trait]
impl InferenceBackend for ProviderBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &InferenceRequest<'_>) -> Result<Completion, InferenceError> {
        let messages = build_messages(request);
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| {
                let detail = e.to_string();
                InferenceError::new(classify_message(&detail), detail)
            })?;

        if response.content.trim().is_empty() {
            return Err(InferenceError::model("Empty OCR response"));
        }

        Ok(Completion {
            text: response.content,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_config() {
        let config = OcrConfig::builder()
            .temperature(0.3)
            .max_tokens(1000)
            .build()
            .unwrap();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(1000));
    }

    #[test]
    fn one_user_message_per_request() {
        let image = PagePayload::Image {
            png_base64: "QUJD".into(),
        };
        let req = InferenceRequest {
            page_index: 0,
            payload: &image,
            prompt: "describe",
            skip_special_tokens: false,
        };
        assert_eq!(build_messages(&req).len(), 1);

        let text = PagePayload::Text("body".into());
        let req = InferenceRequest {
            payload: &text,
            ..req
        };
        assert_eq!(build_messages(&req).len(), 1);
    }

    #[test]
    fn unknown_provider_is_reported() {
        let config = OcrConfig::default();
        let result = ProviderBackend::from_factory("no-such-provider", &config);
        assert!(matches!(
            result,
            Err(OcrError::ProviderNotConfigured { .. })
        ));
    }
}
