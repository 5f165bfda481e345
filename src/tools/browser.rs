use crate::config::BrowserConfig;
use crate::tools::{truncate_output, Tool, ToolResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MAX_JS_OUTPUT_CHARS: usize = 10_000;
const SCREENSHOT_JPEG_QUALITY: i64 = 80;

const GET_LINKS_JS: &str = r"() => {
    const links = Array.from(document.querySelectorAll('a[href]'));
    return links
        .map(a => ({ text: a.innerText.trim().substring(0, 100), href: a.href }))
        .filter(l => l.href && l.href !== 'javascript:void(0)');
}";

struct BrowserState {
    browser: Option<Browser>,
    handler: Option<tokio::task::JoinHandle<()>>,
    pages: HashMap<String, Page>,
    next_id: u64,
}

/// Headless-browser controller. A single browser process is launched on
/// the first `navigate` and reused; each navigation mints a fresh page
/// handle (`page_<n>`) bounded by `max_tabs`. Page-map mutations are
/// serialized behind the mutex; page actions run on cloned handles so
/// they can proceed concurrently.
pub struct BrowserTool {
    cfg: BrowserConfig,
    state: Mutex<BrowserState>,
}

impl BrowserTool {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(BrowserState {
                browser: None,
                handler: None,
                pages: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(if self.cfg.timeout_secs > 0 {
            self.cfg.timeout_secs
        } else {
            30
        })
    }

    fn max_tabs(&self) -> usize {
        if self.cfg.max_tabs > 0 {
            self.cfg.max_tabs
        } else {
            3
        }
    }

    fn max_content_chars(&self) -> usize {
        let kb = if self.cfg.max_page_size_kb > 0 {
            self.cfg.max_page_size_kb
        } else {
            2048
        };
        kb * 1024
    }

    async fn ensure_browser(&self, state: &mut BrowserState) -> Result<(), String> {
        if state.browser.is_some() {
            return Ok(());
        }

        let mut builder = ChromeConfig::builder()
            // Chrome refuses to start sandboxed as root (containers)
            .no_sandbox()
            .launch_timeout(self.timeout())
            .request_timeout(self.timeout());
        if !self.cfg.headless {
            builder = builder.with_head();
        }
        let chrome_config = builder
            .build()
            .map_err(|e| format!("failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| format!("failed to launch browser: {}", e))?;

        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        debug!("browser process launched");
        state.browser = Some(browser);
        state.handler = Some(handler_task);
        Ok(())
    }

    async fn get_page(&self, page_id: &str) -> Result<Page, String> {
        let state = self.state.lock().await;
        state
            .pages
            .get(page_id)
            .cloned()
            .ok_or_else(|| format!("page not found: {}", page_id))
    }

    async fn navigate(&self, url: &str) -> ToolResult {
        if let Err(reason) = validate_url(url, &self.cfg.allowed_domains, &self.cfg.denied_domains)
        {
            return ToolResult::error(reason);
        }

        let mut state = self.state.lock().await;

        if state.pages.len() >= self.max_tabs() {
            return ToolResult::error(format!("max tabs limit reached ({})", self.max_tabs()));
        }

        if let Err(e) = self.ensure_browser(&mut state).await {
            return ToolResult::error(e);
        }

        let browser = state.browser.as_ref().expect("browser just ensured");
        let page = match browser.new_page(url).await {
            Ok(page) => page,
            Err(e) => return ToolResult::error(format!("failed to open page: {}", e)),
        };

        if let Err(e) = page.wait_for_navigation().await {
            return ToolResult::error(format!("page load timeout: {}", e));
        }

        state.next_id += 1;
        let page_id = format!("page_{}", state.next_id);
        let title = page.get_title().await.ok().flatten().unwrap_or_default();
        state.pages.insert(page_id.clone(), page);

        ToolResult::ok(format!(
            "Opened page {}: {} (title: {})",
            page_id, url, title
        ))
    }

    async fn get_content(&self, page_id: &str) -> ToolResult {
        let page = match self.get_page(page_id).await {
            Ok(page) => page,
            Err(e) => return ToolResult::error(e),
        };

        match eval_to_string(&page, "() => document.body.innerText").await {
            Ok(text) => ToolResult::ok(truncate_output(
                &text,
                self.max_content_chars(),
                "\n... (content truncated)",
            )),
            Err(e) => ToolResult::error(format!("failed to get content: {}", e)),
        }
    }

    async fn click(&self, page_id: &str, selector: &str) -> ToolResult {
        let page = match self.get_page(page_id).await {
            Ok(page) => page,
            Err(e) => return ToolResult::error(e),
        };

        let element = match page.find_element(selector).await {
            Ok(el) => el,
            Err(e) => return ToolResult::error(format!("element not found: {}", e)),
        };

        match element.click().await {
            Ok(_) => ToolResult::ok(format!("Clicked element: {}", selector)),
            Err(e) => ToolResult::error(format!("click failed: {}", e)),
        }
    }

    async fn fill(&self, page_id: &str, selector: &str, text: &str) -> ToolResult {
        let page = match self.get_page(page_id).await {
            Ok(page) => page,
            Err(e) => return ToolResult::error(e),
        };

        let element = match page.find_element(selector).await {
            Ok(el) => el,
            Err(e) => return ToolResult::error(format!("element not found: {}", e)),
        };

        // Focus, select whatever is there, then type over the selection
        if let Err(e) = element.click().await {
            return ToolResult::error(format!("failed to focus element: {}", e));
        }
        if let Err(e) = page
            .evaluate("document.execCommand('selectAll', false, null)")
            .await
        {
            return ToolResult::error(format!("failed to select text: {}", e));
        }
        match element.type_str(text).await {
            Ok(_) => ToolResult::ok(format!(
                "Filled '{}' with text ({} chars)",
                selector,
                text.chars().count()
            )),
            Err(e) => ToolResult::error(format!("failed to fill: {}", e)),
        }
    }

    async fn screenshot(&self, page_id: &str) -> ToolResult {
        let page = match self.get_page(page_id).await {
            Ok(page) => page,
            Err(e) => return ToolResult::error(e),
        };

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(SCREENSHOT_JPEG_QUALITY)
            .full_page(true)
            .build();

        match page.screenshot(params).await {
            Ok(bytes) => ToolResult::ok(format!(
                "data:image/jpeg;base64,{}",
                BASE64.encode(bytes)
            )),
            Err(e) => ToolResult::error(format!("screenshot failed: {}", e)),
        }
    }

    async fn eval_js(&self, page_id: &str, script: &str) -> ToolResult {
        let page = match self.get_page(page_id).await {
            Ok(page) => page,
            Err(e) => return ToolResult::error(e),
        };

        match eval_to_string(&page, script).await {
            Ok(output) => ToolResult::ok(truncate_output(
                &output,
                MAX_JS_OUTPUT_CHARS,
                "\n... (output truncated)",
            )),
            Err(e) => ToolResult::error(format!("eval failed: {}", e)),
        }
    }

    async fn get_links(&self, page_id: &str) -> ToolResult {
        let page = match self.get_page(page_id).await {
            Ok(page) => page,
            Err(e) => return ToolResult::error(e),
        };

        let links = match page.evaluate(GET_LINKS_JS).await {
            Ok(result) => result.value().cloned().unwrap_or_else(|| json!([])),
            Err(e) => return ToolResult::error(format!("failed to get links: {}", e)),
        };

        let serialized = serde_json::to_string_pretty(&links).unwrap_or_default();
        ToolResult::ok(truncate_output(
            &serialized,
            MAX_JS_OUTPUT_CHARS,
            "\n... (truncated)",
        ))
    }

    async fn close_page(&self, page_id: &str) -> ToolResult {
        let mut state = self.state.lock().await;
        let Some(page) = state.pages.remove(page_id) else {
            return ToolResult::error(format!("page not found: {}", page_id));
        };
        if let Err(e) = page.close().await {
            warn!("error closing page {}: {}", page_id, e);
        }
        ToolResult::ok(format!("Closed page {}", page_id))
    }

    /// Tear down all live pages, then the browser process.
    pub async fn close_all(&self) {
        let mut state = self.state.lock().await;
        for (id, page) in state.pages.drain() {
            if let Err(e) = page.close().await {
                warn!("error closing page {}: {}", id, e);
            }
        }
        if let Some(mut browser) = state.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("error closing browser: {}", e);
            }
        }
        if let Some(handler) = state.handler.take() {
            handler.abort();
        }
    }
}

async fn eval_to_string(page: &Page, script: &str) -> Result<String, anyhow::Error> {
    let result = page.evaluate(script).await?;
    Ok(match result.value() {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    })
}

/// Validate a navigation target: scheme, loopback/private/link-local
/// rejection, then the domain deny/allow lists. Hostnames are *not*
/// resolved here: a name pointing at a private IP is only caught by
/// the domain lists, which deployments that care must configure.
pub fn validate_url(raw_url: &str, allowed: &[String], denied: &[String]) -> Result<(), String> {
    let parsed = url::Url::parse(raw_url).map_err(|e| format!("invalid URL: {}", e))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!(
            "only http/https schemes are allowed, got: {}",
            parsed.scheme()
        ));
    }

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    if host.is_empty() {
        return Err("URL has no host".to_string());
    }

    if is_private_host(&host) {
        return Err(format!(
            "access to private/loopback addresses is denied: {}",
            host
        ));
    }

    let matches_entry = |entry: &String| {
        let entry = entry.to_lowercase();
        host == entry || host.ends_with(&format!(".{}", entry))
    };

    if denied.iter().any(matches_entry) {
        return Err(format!("domain {} is denied", host));
    }

    if !allowed.is_empty() && !allowed.iter().any(matches_entry) {
        return Err(format!("domain {} is not in allowed list", host));
    }

    Ok(())
}

fn is_private_host(host: &str) -> bool {
    if matches!(host, "localhost" | "ip6-localhost" | "ip6-loopback") {
        return true;
    }

    // Bracketed IPv6 hosts come back bare from url::host_str
    let candidate = host.trim_start_matches('[').trim_end_matches(']');
    let Ok(ip) = candidate.parse::<IpAddr>() else {
        return false;
    };

    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_unspecified();
            }
            let segments = v6.segments();
            // fe80::/10 link-local, fc00::/7 unique local
            segments[0] & 0xffc0 == 0xfe80 || segments[0] & 0xfe00 == 0xfc00
        }
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Control a web browser. Actions: navigate (open URL), get_content (page text), \
         click (CSS selector), fill (type text into input), screenshot (capture page), \
         eval_js (run JavaScript), get_links (list all links), close (close tab)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["navigate", "get_content", "click", "fill", "screenshot",
                             "eval_js", "get_links", "close"],
                    "description": "The browser action to perform"
                },
                "url": {
                    "type": "string",
                    "description": "URL to navigate to (for navigate action)"
                },
                "page_id": {
                    "type": "string",
                    "description": "Page ID returned by navigate (for all actions except navigate)"
                },
                "selector": {
                    "type": "string",
                    "description": "CSS selector (for click and fill actions)"
                },
                "text": {
                    "type": "string",
                    "description": "Text to type (for fill action)"
                },
                "script": {
                    "type": "string",
                    "description": "JavaScript code to execute (for eval_js action)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let action = args["action"].as_str().unwrap_or_default().to_string();
        let url = args["url"].as_str().unwrap_or_default();
        let page_id = args["page_id"].as_str().unwrap_or_default();
        let selector = args["selector"].as_str().unwrap_or_default();
        let text = args["text"].as_str().unwrap_or_default();
        let script = args["script"].as_str().unwrap_or_default();

        let action_future = async {
            match action.as_str() {
                "navigate" => {
                    if url.is_empty() {
                        return ToolResult::error("url is required for navigate action");
                    }
                    self.navigate(url).await
                }
                "get_content" => self.require_page(page_id, self.get_content(page_id)).await,
                "click" => {
                    if page_id.is_empty() || selector.is_empty() {
                        return ToolResult::error("page_id and selector are required");
                    }
                    self.click(page_id, selector).await
                }
                "fill" => {
                    if page_id.is_empty() || selector.is_empty() {
                        return ToolResult::error("page_id, selector, and text are required");
                    }
                    self.fill(page_id, selector, text).await
                }
                "screenshot" => self.require_page(page_id, self.screenshot(page_id)).await,
                "eval_js" => {
                    if page_id.is_empty() || script.is_empty() {
                        return ToolResult::error("page_id and script are required");
                    }
                    self.eval_js(page_id, script).await
                }
                "get_links" => self.require_page(page_id, self.get_links(page_id)).await,
                "close" => self.require_page(page_id, self.close_page(page_id)).await,
                other => ToolResult::error(format!("unknown action: {}", other)),
            }
        };

        match tokio::time::timeout(self.timeout(), action_future).await {
            Ok(result) => Ok(result),
            Err(_) => Ok(ToolResult::error(format!(
                "browser action timed out after {}s",
                self.timeout().as_secs()
            ))),
        }
    }
}

impl BrowserTool {
    async fn require_page(
        &self,
        page_id: &str,
        action: impl std::future::Future<Output = ToolResult>,
    ) -> ToolResult {
        if page_id.is_empty() {
            return ToolResult::error("page_id is required");
        }
        action.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lists() -> (Vec<String>, Vec<String>) {
        (Vec::new(), Vec::new())
    }

    #[test]
    fn rejects_non_http_schemes() {
        let (allow, deny) = no_lists();
        assert!(validate_url("file:///etc/passwd", &allow, &deny).is_err());
        assert!(validate_url("ftp://example.com", &allow, &deny).is_err());
        assert!(validate_url("javascript:alert(1)", &allow, &deny).is_err());
    }

    #[test]
    fn rejects_localhost_aliases() {
        let (allow, deny) = no_lists();
        assert!(validate_url("http://localhost:8080/admin", &allow, &deny).is_err());
        assert!(validate_url("http://LOCALHOST/", &allow, &deny).is_err());
        assert!(validate_url("http://ip6-localhost/", &allow, &deny).is_err());
    }

    #[test]
    fn rejects_private_and_loopback_ips() {
        let (allow, deny) = no_lists();
        for url in [
            "http://127.0.0.1/",
            "http://192.168.1.1",
            "http://10.0.0.5/",
            "http://172.16.0.1/",
            "http://169.254.1.1/",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://[fe80::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            assert!(validate_url(url, &allow, &deny).is_err(), "{}", url);
        }
    }

    #[test]
    fn allows_public_hosts() {
        let (allow, deny) = no_lists();
        assert!(validate_url("https://example.com/page", &allow, &deny).is_ok());
        assert!(validate_url("http://8.8.8.8/", &allow, &deny).is_ok());
    }

    #[test]
    fn deny_list_covers_subdomains() {
        let deny = vec!["evil.com".to_string()];
        assert!(validate_url("https://evil.com/", &[], &deny).is_err());
        assert!(validate_url("https://sub.evil.com/", &[], &deny).is_err());
        assert!(validate_url("https://Evil.COM/", &[], &deny).is_err());
        assert!(validate_url("https://notevil.com/", &[], &deny).is_ok());
    }

    #[test]
    fn allow_list_is_exclusive_when_set() {
        let allow = vec!["example.com".to_string()];
        assert!(validate_url("https://example.com/", &allow, &[]).is_ok());
        assert!(validate_url("https://docs.example.com/", &allow, &[]).is_ok());
        assert!(validate_url("https://other.com/", &allow, &[]).is_err());
    }

    #[test]
    fn hostnames_are_not_resolved() {
        // A name that may well point at a private IP still passes: DNS
        // classification is delegated to the domain lists.
        let (allow, deny) = no_lists();
        assert!(validate_url("http://router.internal.example/", &allow, &deny).is_ok());
    }

    #[tokio::test]
    async fn actions_require_page_id() {
        let tool = BrowserTool::new(BrowserConfig::default());
        for action in ["get_content", "screenshot", "get_links", "close"] {
            let result = tool.execute(json!({"action": action})).await.unwrap();
            assert!(result.is_error, "{}", action);
            assert!(result.error.contains("page_id"), "{}", action);
        }
    }

    #[tokio::test]
    async fn navigate_requires_url() {
        let tool = BrowserTool::new(BrowserConfig::default());
        let result = tool.execute(json!({"action": "navigate"})).await.unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("url is required"));
    }

    #[tokio::test]
    async fn unknown_page_is_domain_error() {
        let tool = BrowserTool::new(BrowserConfig::default());
        let result = tool
            .execute(json!({"action": "get_content", "page_id": "page_99"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("page not found"));
    }

    #[tokio::test]
    async fn navigate_rejects_blocked_url_before_launching() {
        let tool = BrowserTool::new(BrowserConfig::default());
        let result = tool
            .execute(json!({"action": "navigate", "url": "http://192.168.1.1"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("private/loopback"));
    }
}
