use crate::tools::{truncate_output, Tool, ToolResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; OpenDan/1.0)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Response body read cap (bytes) before any parsing.
const MAX_BODY_BYTES: usize = 100_000;
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Web search over the DuckDuckGo HTML endpoint. The raw HTML is
/// returned; result extraction is delegated to the LLM.
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self::with_endpoint(SEARCH_ENDPOINT.to_string())
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            endpoint,
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns search results with titles and URLs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(query) = args["query"].as_str().filter(|q| !q.is_empty()) else {
            return Ok(ToolResult::error("query is required"));
        };

        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));
        let resp = match self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Ok(ToolResult::error(format!("search request failed: {}", e))),
        };

        // Cap the read before buffering; search pages can be
        // arbitrarily large.
        let mut body = Vec::with_capacity(8 * 1024);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(ToolResult::error(format!(
                        "failed to read response: {}",
                        e
                    )))
                }
            };
            let remaining = MAX_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            if body.len() >= MAX_BODY_BYTES {
                break;
            }
        }

        let html = String::from_utf8_lossy(&body);
        Ok(ToolResult::ok(truncate_output(
            &html,
            MAX_OUTPUT_CHARS,
            "\n... (truncated)",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_encoded_query_with_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .and(query_param("q", "rust async"))
            .and(header("User-Agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>results</html>"))
            .mount(&server)
            .await;

        let tool = WebSearchTool::with_endpoint(format!("{}/html/", server.uri()));
        let result = tool
            .execute(json!({"query": "rust async"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.output.contains("results"));
    }

    #[tokio::test]
    async fn missing_query_is_domain_error() {
        let tool = WebSearchTool::new();
        let result = tool.execute(json!({})).await.unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("query is required"));
    }

    #[tokio::test]
    async fn output_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(60_000)))
            .mount(&server)
            .await;

        let tool = WebSearchTool::with_endpoint(format!("{}/html/", server.uri()));
        let result = tool.execute(json!({"query": "q"})).await.unwrap();
        assert!(result.output.ends_with("... (truncated)"));
        assert!(result.output.chars().count() <= MAX_OUTPUT_CHARS + 20);
    }
}
