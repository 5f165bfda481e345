use crate::channels::{split_message, Channel, InboundMessage, MessageHandler, OutboundMessage};
use crate::config::TelegramConfig;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use teloxide::prelude::*;
use teloxide::types::Message as TgMessage;
use tracing::{info, warn};

/// Telegram caps messages at 4096 chars; chunk below that.
const CHUNK_LIMIT: usize = 4000;

pub struct TelegramChannel {
    bot: Bot,
    allowed_ids: HashSet<i64>,
    handler: Mutex<Option<MessageHandler>>,
    dispatcher_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    running: AtomicBool,
}

impl TelegramChannel {
    pub fn new(cfg: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(&cfg.token),
            allowed_ids: cfg.allowed_ids.iter().copied().collect(),
            handler: Mutex::new(None),
            dispatcher_task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handler = self
            .handler
            .lock()
            .expect("telegram lock poisoned")
            .clone();
        let allowed_ids = Arc::new(self.allowed_ids.clone());
        let bot = self.bot.clone();

        let update_handler = Update::filter_message().endpoint(move |msg: TgMessage| {
            let handler = handler.clone();
            let allowed_ids = allowed_ids.clone();
            async move {
                let Some(text) = msg.text() else {
                    return Ok(());
                };
                let Some(sender) = msg.from() else {
                    return Ok(());
                };

                let sender_id = sender.id.0 as i64;
                if !allowed_ids.is_empty() && !allowed_ids.contains(&sender_id) {
                    warn!(
                        "telegram: dropping message from unauthorized user {} ({})",
                        sender_id,
                        sender.username.as_deref().unwrap_or("")
                    );
                    return Ok(());
                }

                if let Some(handler) = &handler {
                    handler(InboundMessage {
                        channel: "telegram".to_string(),
                        sender_id: sender_id.to_string(),
                        sender_name: sender.full_name(),
                        chat_id: msg.chat.id.to_string(),
                        text: text.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                Ok::<(), anyhow::Error>(())
            }
        });

        let task = tokio::spawn(async move {
            Dispatcher::builder(bot, update_handler)
                .build()
                .dispatch()
                .await;
        });
        *self
            .dispatcher_task
            .lock()
            .expect("telegram lock poisoned") = Some(task);

        info!("telegram channel started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(task) = self
            .dispatcher_task
            .lock()
            .expect("telegram lock poisoned")
            .take()
        {
            task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let chat_id: i64 = msg
            .chat_id
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid telegram chat ID: {}", msg.chat_id))?;

        for chunk in split_message(&msg.text, CHUNK_LIMIT) {
            self.bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .map_err(|e| anyhow::anyhow!("telegram send: {}", e))?;
        }
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock().expect("telegram lock poisoned") = Some(handler);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
