use crate::memory::Memory;
use crate::providers::base::{Message, ToolCall};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_calls TEXT,
        tool_call_id TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id, created_at)",
    "CREATE TABLE IF NOT EXISTS summaries (
        chat_id TEXT PRIMARY KEY,
        summary TEXT NOT NULL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
];

/// SQLite-backed conversation store. A single connection behind a
/// mutex is enough: every operation is a short single-row touch, and
/// WAL keeps readers off the writers' backs.
pub struct SqliteMemory {
    conn: Mutex<Connection>,
}

impl SqliteMemory {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )
        .context("applying database pragmas")?;

        for stmt in MIGRATIONS {
            conn.execute(stmt, []).context("running migration")?;
        }

        debug!("conversation store opened at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        for stmt in MIGRATIONS {
            conn.execute(stmt, [])?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Memory for SqliteMemory {
    async fn save_message(&self, chat_id: &str, msg: &Message) -> Result<()> {
        let tool_calls_json = match &msg.tool_calls {
            Some(calls) if !calls.is_empty() => Some(serde_json::to_string(calls)?),
            _ => None,
        };

        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO messages (chat_id, role, content, tool_calls, tool_call_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat_id,
                msg.role,
                msg.content,
                tool_calls_json,
                msg.tool_call_id
            ],
        )
        .context("saving message")?;
        Ok(())
    }

    async fn get_history(&self, chat_id: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT role, content, tool_calls, tool_call_id FROM (
                SELECT id, role, content, tool_calls, tool_call_id
                FROM messages WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2
            ) ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![chat_id, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, tool_calls_json, tool_call_id) = row?;
            let tool_calls = tool_calls_json
                .as_deref()
                .and_then(|s| serde_json::from_str::<Vec<ToolCall>>(s).ok());
            messages.push(Message {
                role,
                content,
                tool_calls,
                tool_call_id,
            });
        }
        Ok(messages)
    }

    async fn save_summary(&self, chat_id: &str, summary: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO summaries (chat_id, summary, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![chat_id, summary],
        )
        .context("saving summary")?;
        Ok(())
    }

    async fn get_summary(&self, chat_id: &str) -> Result<String> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let summary: Option<String> = conn
            .query_row(
                "SELECT summary FROM summaries WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(summary.unwrap_or_default())
    }

    fn close(&self) {
        // The connection closes on drop; nothing else to flush with WAL.
    }
}
