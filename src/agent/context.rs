use crate::providers::base::{ChatRequest, Message, Provider};
use tracing::warn;

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You are a conversation summarizer. Create a brief, factual summary.";
/// Number of trailing messages kept verbatim through a summarization.
const KEEP_RECENT: usize = 4;

/// Watches the working message list and compresses it into a summary
/// plus a recent tail when it approaches the context limit.
pub struct ContextManager {
    summarize_at: usize,
}

impl ContextManager {
    pub fn new(summarize_at: usize) -> Self {
        Self { summarize_at }
    }

    pub fn should_summarize(&self, messages: &[Message]) -> bool {
        estimate_tokens(messages) > self.summarize_at
    }

    /// Compress the conversation into (summary, recent tail). On
    /// summarizer failure the summary is empty and the caller degrades
    /// to plain truncation of the prefix.
    pub async fn summarize(
        &self,
        provider: &dyn Provider,
        messages: Vec<Message>,
    ) -> (String, Vec<Message>) {
        if messages.len() <= KEEP_RECENT {
            return (String::new(), messages);
        }

        let cutoff = messages.len() - KEEP_RECENT;
        let (prefix, recent) = messages.split_at(cutoff);

        let mut text = String::new();
        for msg in prefix {
            text.push_str(&msg.role);
            text.push_str(": ");
            text.push_str(&msg.content);
            text.push('\n');
        }

        let req = ChatRequest {
            messages: vec![Message::user(format!(
                "Summarize this conversation concisely, preserving key facts, decisions, and context:\n\n{}",
                text
            ))],
            max_tokens: 1024,
            temperature: 0.3,
            system_prompt: SUMMARIZER_SYSTEM_PROMPT.to_string(),
            ..Default::default()
        };

        match provider.chat(&req).await {
            Ok(resp) => (resp.content, recent.to_vec()),
            Err(e) => {
                warn!("summarization failed, truncating instead: {}", e);
                (String::new(), recent.to_vec())
            }
        }
    }
}

/// Cheap token estimate: ~4 characters per token across message content
/// and tool-call arguments. A deliberate under-approximation used only
/// as a summarization trigger.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let mut total = 0;
    for msg in messages {
        total += msg.content.len() / 4;
        if let Some(tool_calls) = &msg.tool_calls {
            for tc in tool_calls {
                total += serde_json::to_string(&tc.arguments)
                    .map(|s| s.len())
                    .unwrap_or(0)
                    / 4;
            }
        }
    }
    total
}
