//! The OCR engine seam and its vision-model implementation.
//!
//! The pipeline only needs `ocr(image) -> (text, confidence)`.
//! [`VisionLlmOcr`] sends the page PNG to a vision model with the
//! transcription prompt. A failure here is page-level: the caller stores the
//! page with empty text and moves on.
//!
//! ## Retry Strategy
//!
//! Same as the completion service: `retry_backoff_ms * 2^attempt` between
//! attempts, each attempt bounded by the per-call timeout.

use super::encode::encode_page;
use crate::config::PipelineConfig;
use crate::llm::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Text recognised on one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrText {
    pub text: String,
    /// 0–100 when the engine reports one.
    pub confidence: Option<f32>,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("OCR engine failed after {retries} retries: {detail}")]
    Engine { detail: String, retries: u32 },
}

/// External OCR capability.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn ocr(&self, image: &DynamicImage) -> Result<OcrText, OcrError>;
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:text|markdown|plaintext)?\n(.*)\n```\s*$").unwrap());

/// Models sometimes wrap the transcription in a fence despite the prompt.
fn strip_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

/// OCR through a vision-capable LLM.
pub struct VisionLlmOcr {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout: Duration,
}

impl VisionLlmOcr {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            temperature: config.ocr_temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

#[async_trait]
impl OcrEngine for VisionLlmOcr {
    async fn ocr(&self, image: &DynamicImage) -> Result<OcrText, OcrError> {
        let start = Instant::now();
        let image_data = encode_page(image)?;
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!("OCR: retry {}/{} after {}ms", attempt, self.max_retries, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "OCR: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(OcrText {
                        text: strip_fences(&response.content),
                        confidence: None,
                    });
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{}", e);
                    warn!("OCR: attempt {} failed — {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
                Err(_) => {
                    warn!("OCR: attempt {} timed out", attempt + 1);
                    last_err = Some(format!("timed out after {:?}", self.timeout));
                }
            }
        }

        Err(OcrError::Engine {
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
            retries: self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_fences("```text\n§ 1. Точки\n```"), "§ 1. Точки");
        assert_eq!(strip_fences("```\nПрямая\n```\n"), "Прямая");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(strip_fences("  1. Найдите угол.\n"), "1. Найдите угол.");
    }
}
