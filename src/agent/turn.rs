use crate::agent::Agent;
use crate::bus::topics;
use crate::providers::base::{ChatRequest, Message};
use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};

/// How many persisted messages are loaded into the working list.
const HISTORY_LIMIT: u32 = 50;

const SUMMARY_BOOTSTRAP_ACK: &str = "I understand the previous context. How can I help?";
const SUMMARY_CONTINUE_ACK: &str = "I understand the context. Continuing...";

impl Agent {
    /// Run the think → act → observe loop for one user message.
    ///
    /// Only the final assistant text is persisted. Intermediate
    /// tool-call turns and tool results exist solely to form the next
    /// provider request, which keeps the durable history replayable as
    /// a plain text chat.
    pub(super) async fn process_turn(&self, chat_id: &str, user_text: &str) -> Result<String> {
        let history = match self.memory.get_history(chat_id, HISTORY_LIMIT).await {
            Ok(history) => history,
            Err(e) => {
                warn!("failed to load history for {}: {}", chat_id, e);
                Vec::new()
            }
        };
        let summary = self
            .memory
            .get_summary(chat_id)
            .await
            .unwrap_or_default();

        let mut messages = Vec::with_capacity(history.len() + 3);
        if !summary.is_empty() {
            messages.push(Message::user(format!(
                "[Previous conversation summary]: {}",
                summary
            )));
            messages.push(Message::assistant(SUMMARY_BOOTSTRAP_ACK));
        }
        messages.extend(history);
        messages.push(Message::user(user_text));

        if let Err(e) = self
            .memory
            .save_message(chat_id, &Message::user(user_text))
            .await
        {
            warn!("failed to persist user message: {}", e);
        }

        let provider = self.provider();
        let mut tool_call_count = 0usize;

        loop {
            if self.ctx_manager.should_summarize(&messages) {
                let (new_summary, recent) = self
                    .ctx_manager
                    .summarize(provider.as_ref(), std::mem::take(&mut messages))
                    .await;
                if new_summary.is_empty() {
                    messages = recent;
                } else {
                    if let Err(e) = self.memory.save_summary(chat_id, &new_summary).await {
                        warn!("failed to persist summary: {}", e);
                    }
                    messages = Vec::with_capacity(recent.len() + 2);
                    messages.push(Message::user(format!(
                        "[Conversation summary]: {}",
                        new_summary
                    )));
                    messages.push(Message::assistant(SUMMARY_CONTINUE_ACK));
                    messages.extend(recent);
                }
            }

            let req = ChatRequest {
                messages: messages.clone(),
                tools: self.tools.definitions(),
                max_tokens: self.cfg.max_tokens,
                temperature: self.cfg.temperature,
                system_prompt: self.cfg.system_prompt.clone(),
                ..Default::default()
            };

            self.bus.publish(
                topics::LLM_REQUEST,
                json!({"chat_id": chat_id, "messages": req.messages.len(), "tools": req.tools.len()}),
            );

            let resp = provider
                .chat(&req)
                .await
                .map_err(|e| anyhow::anyhow!("LLM error: {}", e))?;

            self.bus.publish(
                topics::LLM_RESPONSE,
                json!({
                    "chat_id": chat_id,
                    "content_chars": resp.content.len(),
                    "tool_calls": resp.tool_calls.len(),
                    "stop_reason": resp.stop_reason,
                }),
            );

            if !resp.has_tool_calls() {
                if let Err(e) = self
                    .memory
                    .save_message(chat_id, &Message::assistant(&resp.content))
                    .await
                {
                    warn!("failed to persist assistant message: {}", e);
                }
                return Ok(resp.content);
            }

            // Guard against unbounded tool-call loops
            tool_call_count += resp.tool_calls.len();
            if tool_call_count > self.cfg.max_tool_calls {
                let msg = format!(
                    "I've reached the maximum number of tool calls for this request. Here's what I have so far: {}",
                    resp.content
                );
                if let Err(e) = self
                    .memory
                    .save_message(chat_id, &Message::assistant(&msg))
                    .await
                {
                    warn!("failed to persist truncation message: {}", e);
                }
                return Ok(msg);
            }

            messages.push(Message::assistant_with_tools(
                &resp.content,
                resp.tool_calls.clone(),
            ));

            for tc in &resp.tool_calls {
                self.bus.publish(
                    topics::TOOL_CALL,
                    json!({"id": tc.id, "name": tc.name, "arguments": tc.arguments}),
                );

                let result = match self.tools.get(&tc.name) {
                    None => format!("Error: tool '{}' not found", tc.name),
                    Some(tool) => match tool.execute(tc.arguments.clone()).await {
                        Err(e) => format!("Error executing tool: {}", e),
                        Ok(res) if res.is_error => format!("Error: {}", res.error),
                        Ok(res) => res.output,
                    },
                };

                debug!(
                    "tool {} ({}) -> {} chars",
                    tc.name,
                    tc.id,
                    result.len()
                );
                self.bus.publish(
                    topics::TOOL_RESULT,
                    json!({"id": tc.id, "result_chars": result.len()}),
                );

                messages.push(Message::tool_result(&tc.id, result));
            }
        }
    }
}
