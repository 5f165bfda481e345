pub mod anthropic;
pub mod base;
pub mod errors;
pub mod fallback;
pub mod openai;
pub mod sse;

use crate::config::LlmConfig;
use crate::errors::OpendanError;
use anthropic::AnthropicProvider;
use base::Provider;
use fallback::FallbackProvider;
use openai::OpenAIProvider;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout for LLM provider HTTP clients (seconds).
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Overall request timeout for LLM provider HTTP clients (seconds).
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Build a `reqwest::Client` with standard provider timeouts.
pub(crate) fn provider_http_client(timeout_secs: u64) -> Client {
    let timeout = if timeout_secs > 0 {
        timeout_secs
    } else {
        DEFAULT_REQUEST_TIMEOUT_SECS
    };
    Client::builder()
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(timeout))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Construct a concrete provider from config. OpenRouter and local
/// endpoints reuse the OpenAI-compatible client with their own base URL.
pub fn make_provider(cfg: &LlmConfig) -> Result<Arc<dyn Provider>, OpendanError> {
    if let Some(base_url) = &cfg.base_url {
        crate::config::validate_base_url(base_url)?;
    }

    let api_key = cfg.api_key.clone().unwrap_or_default();
    let model = cfg.model.clone();

    let provider: Arc<dyn Provider> = match cfg.provider.as_str() {
        "openai" | "openrouter" | "local" => {
            let base_url = cfg.base_url.clone().unwrap_or_else(|| {
                match cfg.provider.as_str() {
                    "openrouter" => "https://openrouter.ai/api/v1",
                    "local" => "http://localhost:11434/v1",
                    _ => "https://api.openai.com/v1",
                }
                .to_string()
            });
            Arc::new(OpenAIProvider::with_config(
                api_key,
                model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
                base_url,
                cfg.provider.clone(),
                cfg.timeout_secs,
            ))
        }
        "anthropic" => Arc::new(AnthropicProvider::new(api_key, model)),
        other => {
            return Err(OpendanError::Config(format!(
                "unknown LLM provider: {}",
                other
            )))
        }
    };

    Ok(provider)
}

/// Build the provider the agent talks to: the primary alone, or a
/// fallback chain when a secondary is configured.
pub fn build_provider_chain(
    primary: &LlmConfig,
    fallback: Option<&LlmConfig>,
) -> Result<Arc<dyn Provider>, OpendanError> {
    let first = make_provider(primary)?;
    match fallback {
        Some(cfg) => {
            let second = make_provider(cfg)?;
            Ok(Arc::new(FallbackProvider::new(vec![first, second])))
        }
        None => Ok(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let err = make_provider(&llm_config("martian")).unwrap_err();
        assert!(err.to_string().contains("unknown LLM provider"));
    }

    #[test]
    fn known_providers_construct() {
        for name in ["openai", "openrouter", "local", "anthropic"] {
            assert!(make_provider(&llm_config(name)).is_ok(), "{}", name);
        }
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let cfg = LlmConfig {
            base_url: Some("ftp://example.com".to_string()),
            ..llm_config("openai")
        };
        assert!(make_provider(&cfg).is_err());
    }

    #[test]
    fn chain_name_marks_fallback() {
        let chain =
            build_provider_chain(&llm_config("openai"), Some(&llm_config("anthropic"))).unwrap();
        assert_eq!(chain.name(), "openai+fallback");
    }

    #[test]
    fn single_provider_has_plain_name() {
        let provider = build_provider_chain(&llm_config("anthropic"), None).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }
}
