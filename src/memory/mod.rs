pub mod sqlite;

pub use sqlite::SqliteMemory;

use crate::providers::base::Message;
use anyhow::Result;
use async_trait::async_trait;

/// Durable, per-chat conversation storage. Writes are append-only;
/// the summary is an atomic upsert.
#[async_trait]
pub trait Memory: Send + Sync {
    async fn save_message(&self, chat_id: &str, msg: &Message) -> Result<()>;

    /// Up to `limit` most recent messages, oldest first.
    async fn get_history(&self, chat_id: &str, limit: u32) -> Result<Vec<Message>>;

    async fn save_summary(&self, chat_id: &str, summary: &str) -> Result<()>;

    /// The rolling summary, or empty string if none exists.
    async fn get_summary(&self, chat_id: &str) -> Result<String>;

    fn close(&self);
}
