pub mod pool;
pub mod providers;
pub mod retry;
pub mod streaming;
pub mod turn;

use std::sync::Arc;

use weft_core::config::{AppConfig, ModelConfig};
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;

pub use pool::{ModelCandidate, ModelPool, PoolStats, PooledClient};
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;
pub use turn::{collect_turn, ToolCall, Turn};

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" | "azure-openai" | "ollama" | "groq" | "openrouter" | "together" | "vllm" | "custom" => {
            Ok(Box::new(OpenAiClient::new()))
        }
        other => Err(WeftError::UnsupportedProvider(other.to_string())),
    }
}

/// Build the client stack for a config: retrying primary, pooled with fallbacks when present.
pub fn build_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>> {
    let wrap = |model: &ModelConfig| -> Result<Arc<dyn LlmClient>> {
        let inner = create_client(model)?;
        let retry = model.retry.clone().unwrap_or_default();
        Ok(Arc::new(RetryingClient::new(inner, retry)))
    };

    let primary = wrap(&config.model)?;
    if config.fallback_models.is_empty() {
        return Ok(primary);
    }

    let mut candidates = vec![ModelCandidate::new(config.model.clone(), primary)];
    for fallback in &config.fallback_models {
        candidates.push(ModelCandidate::new(fallback.clone(), wrap(fallback)?));
    }
    Ok(Arc::new(PooledClient::new(Arc::new(ModelPool::new(candidates)))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let config = AppConfig::parse("[model]\nmodel_id = \"m\"\nprovider = \"carrier-pigeon\"\n").unwrap();
        assert!(matches!(
            create_client(&config.model),
            Err(WeftError::UnsupportedProvider(p)) if p == "carrier-pigeon"
        ));
    }

    #[test]
    fn fallbacks_build_a_pool() {
        let config = AppConfig::parse(
            "[model]\nmodel_id = \"a\"\n\n[[fallback_models]]\nmodel_id = \"b\"\nprovider = \"ollama\"\n",
        )
        .unwrap();
        assert!(build_client(&config).is_ok());
    }
}
