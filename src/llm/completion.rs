//! The text completion seam.
//!
//! Correction and distribution only need `complete(system, prompt,
//! temperature) -> text`. [`CompletionService`] is that contract;
//! [`ProviderCompletion`] fulfils it with an `edgequake_llm` provider, and
//! tests substitute scripted fakes.
//!
//! ## Retry Strategy
//!
//! Rate limits and 5xx responses are transient. Each call is retried with
//! exponential backoff (`retry_backoff_ms * 2^attempt`): with a 500 ms base
//! and 3 retries the waits are 500 ms → 1 s → 2 s. Every attempt is bounded
//! by `api_timeout_secs` so a hung connection cannot stall a correction job.

use crate::config::PipelineConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Ask a model for text. Responses are untyped; callers parse them.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str, temperature: f32)
        -> Result<String, LlmError>;
}

/// [`CompletionService`] over an `edgequake_llm` provider.
pub struct ProviderCompletion {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout: Duration,
}

impl ProviderCompletion {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    fn options(&self, temperature: f32) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CompletionService for ProviderCompletion {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];
        let options = self.options(temperature);
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Completion: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "Completion: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{}", e);
                    warn!("Completion: attempt {} failed — {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
                Err(_) => {
                    warn!(
                        "Completion: attempt {} timed out after {:?}",
                        attempt + 1,
                        self.timeout
                    );
                    last_err = Some(format!("timed out after {:?}", self.timeout));
                }
            }
        }

        Err(LlmError::Api {
            message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
            retries: self.max_retries,
        })
    }
}
