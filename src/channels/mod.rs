pub mod console;
pub mod manager;
pub mod telegram;

pub use manager::ChannelManager;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A message received from a channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub sender_name: String,
    pub chat_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A message to send through a channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_to: None,
        }
    }
}

pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// A messaging integration. Implementations hold their own transport
/// state behind interior mutability so the manager can share them.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;

    /// Install the inbound handler. Must be called before `start`.
    fn on_message(&self, handler: MessageHandler);

    fn is_running(&self) -> bool;
}

/// Split a long response into chunks below `limit` characters,
/// preferring paragraph and line boundaries over hard cuts.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > limit {
        let window_end = remaining
            .char_indices()
            .nth(limit)
            .map_or(remaining.len(), |(i, _)| i);
        let window = &remaining[..window_end];

        if let Some(idx) = window.rfind("\n\n") {
            chunks.push(remaining[..idx].trim().to_string());
            remaining = &remaining[idx + 2..];
        } else if let Some(idx) = window.rfind('\n') {
            chunks.push(remaining[..idx].trim().to_string());
            remaining = &remaining[idx + 1..];
        } else {
            chunks.push(window.to_string());
            remaining = &remaining[window_end..];
        }
    }

    if !remaining.is_empty() {
        chunks.push(remaining.trim().to_string());
    }

    chunks
}
