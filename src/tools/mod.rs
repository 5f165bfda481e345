pub mod browser;
pub mod filesystem;
pub mod registry;
pub mod shell;
pub mod web_search;

pub use registry::ToolRegistry;

use async_trait::async_trait;
use serde_json::Value;

/// The output of a tool execution. Domain failures are reported with
/// `is_error = true` rather than raised; the agent loop surfaces both
/// forms to the model identically.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub output: String,
    pub error: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            is_error: true,
            ..Default::default()
        }
    }

    /// A failed execution that still produced output (e.g. a shell
    /// command with a non-zero exit).
    pub fn failed(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: message.into(),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value; // JSON Schema

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult>;
}

/// Truncate to a character budget, appending the marker when anything
/// was cut. Counts chars, not bytes, so multi-byte text never splits.
pub(crate) fn truncate_output(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(marker);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_is_noop_under_budget() {
        assert_eq!(truncate_output("short", 100, "..."), "short");
    }

    #[test]
    fn truncate_appends_marker() {
        let out = truncate_output("abcdef", 3, "\n... (output truncated)");
        assert_eq!(out, "abc\n... (output truncated)");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let out = truncate_output("héllo wörld", 4, "…");
        assert_eq!(out, "héll…");
    }
}
