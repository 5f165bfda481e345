use crate::providers::base::{ChatRequest, LLMResponse, Provider, StreamEvent};
use crate::providers::errors::{ErrorKind, LLMError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Tries providers in order. Retryable errors move on to the next
/// provider; a non-retryable error (auth, invalid input) terminates the
/// search immediately since it will not succeed anywhere else.
#[derive(Debug)]
pub struct FallbackProvider {
    providers: Vec<Arc<dyn Provider>>,
    name: String,
}

impl FallbackProvider {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        let name = providers
            .first()
            .map_or_else(|| "fallback".to_string(), |p| format!("{}+fallback", p.name()));
        Self { providers, name }
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LLMResponse, LLMError> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.chat(req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!("provider {} failed: {}, trying next", provider.name(), e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| LLMError::new(ErrorKind::Unknown, "no providers configured")))
    }

    /// Fallback applies at stream open only; once a stream is handed out,
    /// errors arrive as terminal events and no provider switch occurs.
    async fn stream_chat(
        &self,
        req: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, LLMError> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.stream_chat(req).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(
                        "provider {} stream failed: {}, trying next",
                        provider.name(),
                        e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| LLMError::new(ErrorKind::Unknown, "no providers configured")))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        self.providers
            .first()
            .map_or("", |p| p.default_model())
    }
}
