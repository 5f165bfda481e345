pub mod context;
mod turn;

pub use context::ContextManager;

use crate::bus::{topics, EventBus};
use crate::channels::{ChannelManager, InboundMessage, OutboundMessage};
use crate::config::AgentConfig;
use crate::memory::Memory;
use crate::providers::base::{ChatRequest, Message, Provider};
use crate::security::Sanitizer;
use crate::tools::ToolRegistry;
use anyhow::Result;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

const ERROR_REPLY: &str =
    "Sorry, I encountered an error processing your message. Please try again.";

/// The core agent: processes one user message at a time per chat
/// through the think → act → observe loop. Callers are expected to
/// serialize turns per chat id; turns on distinct chats run freely in
/// parallel.
pub struct Agent {
    pub(crate) cfg: AgentConfig,
    provider: RwLock<Arc<dyn Provider>>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) memory: Arc<dyn Memory>,
    pub(crate) bus: Arc<EventBus>,
    channels: Arc<ChannelManager>,
    sanitizer: Arc<Sanitizer>,
    pub(crate) ctx_manager: ContextManager,
}

impl Agent {
    pub fn new(
        cfg: AgentConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        memory: Arc<dyn Memory>,
        bus: Arc<EventBus>,
        channels: Arc<ChannelManager>,
        sanitizer: Arc<Sanitizer>,
    ) -> Self {
        let ctx_manager = ContextManager::new(cfg.summarize_at);
        Self {
            cfg,
            provider: RwLock::new(provider),
            tools,
            memory,
            bus,
            channels,
            sanitizer,
            ctx_manager,
        }
    }

    pub(crate) fn provider(&self) -> Arc<dyn Provider> {
        self.provider
            .read()
            .expect("provider lock poisoned")
            .clone()
    }

    /// Replace the LLM provider (e.g. after a config change).
    pub fn set_provider(&self, provider: Arc<dyn Provider>) {
        *self.provider.write().expect("provider lock poisoned") = provider;
    }

    /// Wire every registered channel's inbound handler to this agent.
    /// Each message is handled on its own task; channels deliver
    /// sequentially per chat, which preserves the one-turn-per-chat
    /// expectation.
    pub fn attach_channels(self: &Arc<Self>) {
        for (name, _) in self.channels.list() {
            let Some(channel) = self.channels.get(&name) else {
                continue;
            };
            let agent = Arc::clone(self);
            channel.on_message(Arc::new(move |msg: InboundMessage| {
                let agent = Arc::clone(&agent);
                tokio::spawn(async move {
                    agent.handle_message(msg).await;
                });
            }));
        }
        info!("agent listening on {} channel(s)", self.channels.list().len());
    }

    /// Channel entry point: run the turn and route the response back
    /// through the originating channel. Channel transport errors are
    /// logged, never raised.
    pub async fn handle_message(&self, msg: InboundMessage) {
        info!(
            "processing message from {} ({}): {}",
            msg.sender_name,
            msg.channel,
            truncate_for_log(&msg.text, 100)
        );
        self.bus.publish(
            topics::INBOUND_MESSAGE,
            json!({"channel": msg.channel, "chat_id": msg.chat_id, "sender_id": msg.sender_id}),
        );

        let response = match self.run_sanitized_turn(&msg.chat_id, &msg.text).await {
            Ok(response) => response,
            Err(e) => {
                error!("error processing message: {}", e);
                self.bus
                    .publish(topics::ERROR, json!({"error": e.to_string()}));
                ERROR_REPLY.to_string()
            }
        };

        let Some(channel) = self.channels.get(&msg.channel) else {
            warn!("channel {} not found for response", msg.channel);
            return;
        };

        self.bus.publish(
            topics::OUTBOUND_MESSAGE,
            json!({"channel": msg.channel, "chat_id": msg.chat_id, "chars": response.len()}),
        );

        if let Err(e) = channel
            .send(&OutboundMessage::new(&msg.chat_id, &response))
            .await
        {
            error!("error sending response via {}: {}", msg.channel, e);
        }
    }

    /// Direct entry point for GUI/console callers. Provider errors
    /// propagate; everything else is absorbed into the response.
    pub async fn handle_direct_message(&self, chat_id: &str, text: &str) -> Result<String> {
        self.run_sanitized_turn(chat_id, text).await
    }

    /// Sanitize inbound text, run the turn, restore PII in the reply.
    async fn run_sanitized_turn(&self, chat_id: &str, text: &str) -> Result<String> {
        let sanitized = self.sanitizer.sanitize(text);
        let response = self.process_turn(chat_id, &sanitized).await?;
        Ok(self.sanitizer.restore(&response))
    }

    /// One-shot provider check used by the CLI.
    pub async fn test_connection(&self) -> Result<()> {
        let req = ChatRequest {
            messages: vec![Message::user("Say 'OK' if you can hear me.")],
            max_tokens: 32,
            ..Default::default()
        };
        self.provider()
            .chat(&req)
            .await
            .map_err(|e| anyhow::anyhow!("provider check failed: {}", e))?;
        Ok(())
    }
}

fn truncate_for_log(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
