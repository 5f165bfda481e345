use crate::channels::{Channel, InboundMessage, MessageHandler, OutboundMessage};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Debug channel reading lines from stdin and printing responses to
/// stdout. All input maps to the single chat id "console".
#[derive(Default)]
pub struct ConsoleChannel {
    handler: Mutex<Option<MessageHandler>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    running: AtomicBool,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handler = self
            .handler
            .lock()
            .expect("console lock poisoned")
            .clone();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            print!("> ");
            use std::io::Write;
            let _ = std::io::stdout().flush();

            while let Ok(Some(line)) = lines.next_line().await {
                let text = line.trim().to_string();
                if text.is_empty() {
                    print!("> ");
                    let _ = std::io::stdout().flush();
                    continue;
                }

                if let Some(handler) = &handler {
                    handler(InboundMessage {
                        channel: "console".to_string(),
                        sender_id: "local".to_string(),
                        sender_name: "User".to_string(),
                        chat_id: "console".to_string(),
                        text,
                        timestamp: Utc::now(),
                    });
                }
            }
        });

        *self.reader_task.lock().expect("console lock poisoned") = Some(task);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(task) = self
            .reader_task
            .lock()
            .expect("console lock poisoned")
            .take()
        {
            task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        println!("\n[OpenDan]: {}\n", msg.text);
        print!("> ");
        use std::io::Write;
        let _ = std::io::stdout().flush();
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock().expect("console lock poisoned") = Some(handler);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
