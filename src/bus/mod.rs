use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Well-known event topics.
pub mod topics {
    pub const INBOUND_MESSAGE: &str = "inbound_message";
    pub const OUTBOUND_MESSAGE: &str = "outbound_message";
    pub const TOOL_CALL: &str = "tool_call";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const LLM_REQUEST: &str = "llm_request";
    pub const LLM_RESPONSE: &str = "llm_response";
    pub const ERROR: &str = "error";
    pub const STATUS_CHANGE: &str = "status_change";
}

#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// In-process pub/sub. A telemetry and UI hook, not part of the
/// correctness-critical path: subscribers must not assume delivery.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str, handler: Handler) {
        self.handlers
            .write()
            .expect("event bus lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    /// Invoke subscribers synchronously, in registration order.
    pub fn publish(&self, topic: &str, payload: Value) {
        let handlers = self.snapshot(topic);
        let event = Event {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        for handler in handlers {
            handler(&event);
        }
    }

    /// Fire-and-forget: each subscriber runs on its own task, with no
    /// ordering guarantee and no back-pressure.
    pub fn publish_async(&self, topic: &str, payload: Value) {
        let handlers = self.snapshot(topic);
        let event = Event {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                handler(&event);
            });
        }
    }

    fn snapshot(&self, topic: &str) -> Vec<Handler> {
        self.handlers
            .read()
            .expect("event bus lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }
}
