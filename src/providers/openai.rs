use crate::providers::base::{
    ChatRequest, LLMResponse, Message, Provider, StreamEvent, ToolCall, Usage,
};
use crate::providers::errors::{ErrorKind, LLMError};
use crate::providers::sse::SseParser;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat-completions client. Also speaks to compatible endpoints
/// (OpenRouter, Ollama, LM Studio, vLLM) via `base_url`.
#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    provider_name: String,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_config(
            api_key,
            default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            DEFAULT_BASE_URL.to_string(),
            "openai".to_string(),
            crate::providers::DEFAULT_REQUEST_TIMEOUT_SECS,
        )
    }

    pub fn with_config(
        api_key: String,
        default_model: String,
        base_url: String,
        provider_name: String,
        timeout_secs: u64,
    ) -> Self {
        Self {
            api_key,
            default_model,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider_name,
            client: crate::providers::provider_http_client(timeout_secs),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_payload(&self, req: &ChatRequest) -> Value {
        let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);

        if !req.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": req.system_prompt}));
        }

        for msg in &req.messages {
            messages.push(convert_message(msg));
        }

        let mut payload = json!({
            "model": req.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
        });

        if req.max_tokens > 0 {
            payload["max_tokens"] = json!(req.max_tokens);
        }
        if req.temperature > 0.0 {
            payload["temperature"] = json!(req.temperature);
        }
        if !req.tools.is_empty() {
            payload["tools"] = json!(req
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                }))
                .collect::<Vec<_>>());
        }

        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, LLMError> {
        let resp = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(LLMError::from_transport)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "unknown error".to_string());
            warn!("{} API returned {}: {}", self.provider_name, status, body);
            return Err(LLMError::from_http(status, &body));
        }
        Ok(resp)
    }
}

fn convert_message(msg: &Message) -> Value {
    let mut out = json!({
        "role": msg.role,
        "content": msg.content,
    });

    if let Some(tool_calls) = &msg.tool_calls {
        out["tool_calls"] = json!(tool_calls
            .iter()
            .map(|tc| {
                // OpenAI carries arguments as a JSON-encoded string
                let args = serde_json::to_string(&tc.arguments).unwrap_or_else(|_| "{}".into());
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {"name": tc.name, "arguments": args},
                })
            })
            .collect::<Vec<_>>());
    }

    if let Some(id) = &msg.tool_call_id {
        out["tool_call_id"] = json!(id);
    }

    out
}

fn parse_response(body: &Value) -> Result<LLMResponse, LLMError> {
    let choice = body["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .ok_or_else(|| LLMError::new(ErrorKind::Unknown, "no choices in response"))?;

    let message = &choice["message"];
    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message["tool_calls"].as_array() {
        for tc in raw_calls {
            let function = &tc["function"];
            let arguments = function["arguments"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_else(|| json!({}));
            tool_calls.push(ToolCall {
                id: tc["id"].as_str().unwrap_or_default().to_string(),
                name: function["name"].as_str().unwrap_or_default().to_string(),
                arguments,
            });
        }
    }

    Ok(LLMResponse {
        content: message["content"].as_str().unwrap_or_default().to_string(),
        tool_calls,
        usage: Usage {
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        },
        stop_reason: choice["finish_reason"].as_str().unwrap_or_default().to_string(),
    })
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LLMResponse, LLMError> {
        debug!(
            "{} chat: model={}",
            self.provider_name,
            req.model.as_deref().unwrap_or(&self.default_model)
        );

        let payload = self.build_payload(req);
        let resp = self.send(&payload).await?;

        let body: Value = resp.json().await.map_err(LLMError::from_transport)?;
        parse_response(&body)
    }

    async fn stream_chat(
        &self,
        req: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, LLMError> {
        let mut payload = self.build_payload(req);
        payload["stream"] = json!(true);
        payload["stream_options"] = json!({"include_usage": true});

        let resp = self.send(&payload).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut body = resp.bytes_stream();
            let mut usage = None;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(LLMError::from_transport(e))).await;
                        return;
                    }
                };

                for event in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    let Some(data) = event.data else { continue };

                    if let Some(u) = data.get("usage").filter(|u| !u.is_null()) {
                        usage = Some(Usage {
                            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
                            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
                        });
                    }

                    let Some(choice) = data["choices"].as_array().and_then(|c| c.first()) else {
                        continue;
                    };
                    if let Some(delta) = choice["delta"]["content"].as_str() {
                        if !delta.is_empty()
                            && tx
                                .send(StreamEvent::ContentDelta(delta.to_string()))
                                .await
                                .is_err()
                        {
                            return;
                        }
                    }
                }
            }

            let _ = tx.send(StreamEvent::Done { usage }).await;
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        &self.provider_name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
