use serde_json::Value;

/// A parsed Server-Sent Event. `data` is `None` for the `[DONE]`
/// sentinel and for payloads that are not valid JSON.
#[derive(Debug)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: Option<Value>,
}

/// Incremental SSE parser. Network chunks split events at arbitrary
/// byte boundaries, so the parser buffers partial input and only emits
/// events once their terminating blank line has arrived.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body, returning every event that
    /// completed with this chunk.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(boundary) = find_event_boundary(&self.buffer) {
            let raw: String = self.buffer.drain(..boundary.end).collect();
            if let Some(event) = parse_event(&raw[..boundary.start]) {
                events.push(event);
            }
        }
        events
    }
}

struct Boundary {
    start: usize, // end of event content
    end: usize,   // end of separator
}

fn find_event_boundary(buffer: &str) -> Option<Boundary> {
    // Events are terminated by a blank line; tolerate CRLF.
    let lf = buffer.find("\n\n").map(|i| Boundary { start: i, end: i + 2 });
    let crlf = buffer
        .find("\r\n\r\n")
        .map(|i| Boundary { start: i, end: i + 4 });
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start < b.start { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data = String::new();

    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.trim_start());
        }
    }

    if data.is_empty() && event_type.is_none() {
        return None;
    }

    let parsed = if data.trim() == "[DONE]" || data.is_empty() {
        None
    } else {
        serde_json::from_str::<Value>(data.trim()).ok()
    };

    Some(SseEvent {
        event_type,
        data: parsed,
    })
}
