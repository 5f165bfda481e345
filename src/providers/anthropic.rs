use crate::providers::base::{
    ChatRequest, LLMResponse, Message, Provider, StreamEvent, ToolCall, Usage,
};
use crate::providers::errors::LLMError;
use crate::providers::sse::SseParser;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_config(
            api_key,
            default_model,
            DEFAULT_BASE_URL.to_string(),
            crate::providers::DEFAULT_REQUEST_TIMEOUT_SECS,
        )
    }

    pub fn with_config(
        api_key: String,
        default_model: Option<String>,
        base_url: String,
        timeout_secs: u64,
    ) -> Self {
        Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: crate::providers::provider_http_client(timeout_secs),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn build_payload(&self, req: &ChatRequest) -> Value {
        let (system, messages) = convert_messages(&req.messages);
        // The messages API requires max_tokens
        let max_tokens = if req.max_tokens > 0 { req.max_tokens } else { 1024 };

        let mut payload = json!({
            "model": req.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
            "max_tokens": max_tokens,
        });

        // History-embedded system messages are folded in after the
        // request-level prompt.
        let mut system_text = req.system_prompt.clone();
        if let Some(extra) = system {
            if !system_text.is_empty() {
                system_text.push_str("\n\n");
            }
            system_text.push_str(&extra);
        }
        if !system_text.is_empty() {
            payload["system"] = json!(system_text);
        }

        if req.temperature > 0.0 {
            payload["temperature"] = json!(req.temperature);
        }

        if !req.tools.is_empty() {
            payload["tools"] = json!(req
                .tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                }))
                .collect::<Vec<_>>());
        }

        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, LLMError> {
        let resp = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(LLMError::from_transport)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "unknown error".to_string());
            warn!("anthropic API returned {}: {}", status, body);
            return Err(LLMError::from_http(status, &body));
        }
        Ok(resp)
    }
}

/// Convert neutral messages to the Anthropic shape.
///
/// Tool invocations become `tool_use` content blocks inside assistant
/// messages; tool results become `tool_result` blocks inside *user*
/// messages. History-embedded system messages are pulled out and
/// returned separately for the top-level `system` field.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut converted: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" => system_parts.push(msg.content.clone()),
            "user" => converted.push(json!({"role": "user", "content": msg.content})),
            "assistant" => {
                let mut blocks: Vec<Value> = Vec::new();
                // Anthropic rejects empty text content blocks
                if !msg.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": msg.content}));
                }
                if let Some(tool_calls) = &msg.tool_calls {
                    for tc in tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                }
                converted.push(json!({"role": "assistant", "content": blocks}));
            }
            "tool" => {
                if let Some(id) = &msg.tool_call_id {
                    converted.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": msg.content,
                        }],
                    }));
                }
            }
            _ => {}
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, merge_consecutive_users(converted))
}

/// The API rejects consecutive same-role messages; sequential tool
/// results each convert to role "user", so merge their content arrays.
fn merge_consecutive_users(messages: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg["role"] == "user" {
            if let Some(last) = merged.last_mut() {
                if last["role"] == "user" {
                    let mut combined = as_blocks(&last["content"]);
                    combined.extend(as_blocks(&msg["content"]));
                    last["content"] = Value::Array(combined);
                    continue;
                }
            }
        }
        merged.push(msg);
    }
    merged
}

fn as_blocks(content: &Value) -> Vec<Value> {
    match content {
        Value::Array(arr) => arr.clone(),
        Value::String(s) => vec![json!({"type": "text", "text": s})],
        other => vec![other.clone()],
    }
}

fn parse_response(body: &Value) -> LLMResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = body["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    content.push_str(block["text"].as_str().unwrap_or_default());
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    });
                }
                _ => {}
            }
        }
    }

    LLMResponse {
        content,
        tool_calls,
        usage: Usage {
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
        },
        stop_reason: body["stop_reason"].as_str().unwrap_or_default().to_string(),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LLMResponse, LLMError> {
        debug!(
            "anthropic chat: model={}",
            req.model.as_deref().unwrap_or(&self.default_model)
        );

        let payload = self.build_payload(req);
        let resp = self.send(&payload).await?;
        let body: Value = resp.json().await.map_err(LLMError::from_transport)?;
        Ok(parse_response(&body))
    }

    async fn stream_chat(
        &self,
        req: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, LLMError> {
        let mut payload = self.build_payload(req);
        payload["stream"] = json!(true);

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

                    match data["type"].as_str() {
                        Some("content_block_delta") => {
                            if data["delta"]["type"] == "text_delta" {
                                let text = data["delta"]["text"].as_str().unwrap_or_default();
                                if !text.is_empty()
                                    && tx
                                        .send(StreamEvent::ContentDelta(text.to_string()))
                                        .await
                                        .is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Some("message_delta") => {
                            if let Some(tokens) = data["usage"]["output_tokens"].as_u64() {
                                usage = Some(Usage {
                                    input_tokens: 0,
                                    output_tokens: tokens,
                                });
                            }
                        }
                        Some("error") => {
                            let message = data["error"]["message"]
                                .as_str()
                                .unwrap_or("stream error")
                                .to_string();
                            let _ = tx.send(StreamEvent::Error(LLMError::classify(message))).await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            let _ = tx.send(StreamEvent::Done { usage }).await;
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
