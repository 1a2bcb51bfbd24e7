//! LLM provider resolution.

use crate::config::PipelineConfig;
use crate::error::IngestError;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is. Tests and
///    callers with custom middleware go through here.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured even when several API keys are present.
/// 4. **OpenAI key** (`OPENAI_API_KEY`) with the configured or default model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// The same provider serves OCR (vision), correction and distribution.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Model label used in raw OCR artefact names.
pub fn model_label(config: &PipelineConfig) -> String {
    config
        .model
        .clone()
        .or_else(|| std::env::var("EDGEQUAKE_MODEL").ok().filter(|m| !m.is_empty()))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
        .replace(['/', ':', ' '], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_label_is_path_safe() {
        let config = PipelineConfig::builder()
            .model("openrouter/meta:llama 3")
            .build()
            .unwrap();
        assert_eq!(model_label(&config), "openrouter_meta_llama_3");
    }
}
