//! End-to-end agent loop tests against a scripted provider.

use async_trait::async_trait;
use opendan::agent::Agent;
use opendan::bus::EventBus;
use opendan::channels::ChannelManager;
use opendan::config::{AgentConfig, PiiFilterConfig};
use opendan::memory::{Memory, SqliteMemory};
use opendan::providers::base::{
    ChatRequest, LLMResponse, Message, Provider, StreamEvent, ToolCall,
};
use opendan::providers::errors::{ErrorKind, LLMError};
use opendan::providers::fallback::FallbackProvider;
use opendan::security::Sanitizer;
use opendan::tools::filesystem::FilesystemTool;
use opendan::tools::{Tool, ToolRegistry, ToolResult};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Provider that replays a fixed script of responses and records every
/// request it receives.
#[derive(Debug)]
struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<LLMResponse, (ErrorKind, String)>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<LLMResponse, (ErrorKind, String)>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn text(content: &str) -> Result<LLMResponse, (ErrorKind, String)> {
        Ok(LLMResponse {
            content: content.to_string(),
            ..Default::default()
        })
    }

    fn tool_call(
        id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<LLMResponse, (ErrorKind, String)> {
        Ok(LLMResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }],
            ..Default::default()
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, idx: usize) -> ChatRequest {
        self.requests.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LLMResponse, LLMError> {
        self.requests.lock().unwrap().push(req.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err((kind, message))) => Err(LLMError::new(kind, message)),
            None => Err(LLMError::new(ErrorKind::Unknown, "script exhausted")),
        }
    }

    async fn stream_chat(
        &self,
        _req: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, LLMError> {
        Err(LLMError::new(ErrorKind::Unknown, "not scripted"))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

struct Fixture {
    agent: Arc<Agent>,
    memory: Arc<dyn Memory>,
    _dir: tempfile::TempDir,
}

fn pii_off() -> PiiFilterConfig {
    PiiFilterConfig {
        enabled: false,
        filter_emails: false,
        filter_phones: false,
        filter_cards: false,
        filter_ips: false,
        filter_ssn: false,
    }
}

fn build_agent(
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    cfg: AgentConfig,
    pii: PiiFilterConfig,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let memory: Arc<dyn Memory> =
        Arc::new(SqliteMemory::open(dir.path().join("memory.db")).unwrap());
    let agent = Arc::new(Agent::new(
        cfg,
        provider,
        tools,
        memory.clone(),
        Arc::new(EventBus::new()),
        Arc::new(ChannelManager::new()),
        Arc::new(Sanitizer::new(&pii)),
    ));
    Fixture {
        agent,
        memory,
        _dir: dir,
    }
}

fn default_cfg() -> AgentConfig {
    AgentConfig {
        system_prompt: "You are a test assistant.".to_string(),
        max_tokens: 512,
        temperature: 0.0,
        max_tool_calls: 20,
        context_window: 100_000,
        summarize_at: 80_000,
    }
}

#[tokio::test]
async fn no_tools_single_turn() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("Hi there!")]);
    let fixture = build_agent(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        default_cfg(),
        pii_off(),
    );

    let response = fixture
        .agent
        .handle_direct_message("c1", "Hello")
        .await
        .unwrap();
    assert_eq!(response, "Hi there!");

    let history = fixture.memory.get_history("c1", 50).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!((history[0].role.as_str(), history[0].content.as_str()), ("user", "Hello"));
    assert_eq!(
        (history[1].role.as_str(), history[1].content.as_str()),
        ("assistant", "Hi there!")
    );
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn single_tool_two_leg_turn() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("a.txt"), "x").unwrap();
    std::fs::create_dir(workspace.path().join("sub")).unwrap();

    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(FilesystemTool::new(workspace.path().to_path_buf())));

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("t1", "filesystem", json!({"action": "list", "path": "."})),
        ScriptedProvider::text("I see a.txt and sub/."),
    ]);
    let fixture = build_agent(provider.clone(), tools, default_cfg(), pii_off());

    let response = fixture
        .agent
        .handle_direct_message("c1", "what is in the workspace")
        .await
        .unwrap();
    assert_eq!(response, "I see a.txt and sub/.");

    // The second leg carries the assistant tool-call message and the
    // bound tool result.
    let second = provider.request(1);
    let n = second.messages.len();
    let assistant = &second.messages[n - 2];
    let tool_msg = &second.messages[n - 1];
    assert_eq!(assistant.role, "assistant");
    let calls = assistant.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id, "t1");
    assert_eq!(tool_msg.role, "tool");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("t1"));
    assert_eq!(tool_msg.content, "  a.txt\nd sub");

    // Only the user message and the final text are persisted.
    let history = fixture.memory.get_history("c1", 50).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "what is in the workspace");
    assert_eq!(history[1].content, "I see a.txt and sub/.");
    assert!(history.iter().all(|m| m.tool_calls.is_none()));
}

#[tokio::test]
async fn unregistered_tool_becomes_error_result() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("t1", "nonexistent", json!({})),
        ScriptedProvider::text("giving up on that tool"),
    ]);
    let fixture = build_agent(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        default_cfg(),
        pii_off(),
    );

    let response = fixture
        .agent
        .handle_direct_message("c1", "use the tool")
        .await
        .unwrap();
    assert_eq!(response, "giving up on that tool");

    let second = provider.request(1);
    let tool_msg = second.messages.last().unwrap();
    assert_eq!(tool_msg.role, "tool");
    assert!(tool_msg
        .content
        .starts_with("Error: tool 'nonexistent' not found"));
}

#[tokio::test]
async fn tool_domain_error_flows_back_as_text() {
    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::error("disk on fire"))
        }
    }

    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(FailingTool));

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("t1", "flaky", json!({})),
        ScriptedProvider::text("noted"),
    ]);
    let fixture = build_agent(provider.clone(), tools, default_cfg(), pii_off());

    let response = fixture
        .agent
        .handle_direct_message("c1", "try it")
        .await
        .unwrap();
    assert_eq!(response, "noted");

    let tool_msg = provider.request(1).messages.last().unwrap().clone();
    assert_eq!(tool_msg.content, "Error: disk on fire");
}

#[tokio::test]
async fn tool_budget_exhaustion() {
    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok("done"))
        }
    }

    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(NoopTool));

    // One tool call per leg, indefinitely.
    let script: Vec<_> = (0..10)
        .map(|i| ScriptedProvider::tool_call(&format!("t{}", i), "noop", json!({})))
        .collect();
    let provider = ScriptedProvider::new(script);

    let mut cfg = default_cfg();
    cfg.max_tool_calls = 2;
    let fixture = build_agent(provider.clone(), tools, cfg, pii_off());

    let response = fixture
        .agent
        .handle_direct_message("c1", "loop forever")
        .await
        .unwrap();
    assert!(response
        .starts_with("I've reached the maximum number of tool calls for this request."));

    // Legs 1 and 2 spend the budget; leg 3's calls exceed it and the
    // provider is not consulted again.
    assert_eq!(provider.request_count(), 3);

    let history = fixture.memory.get_history("c1", 50).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1]
        .content
        .starts_with("I've reached the maximum number of tool calls"));
}

#[tokio::test]
async fn fallback_retryable_then_ok() {
    let primary = ScriptedProvider::new(vec![Err((
        ErrorKind::RateLimit,
        "429 too many requests".to_string(),
    ))]);
    let secondary = ScriptedProvider::new(vec![ScriptedProvider::text("ok")]);
    let chain: Arc<dyn Provider> = Arc::new(FallbackProvider::new(vec![
        primary.clone() as Arc<dyn Provider>,
        secondary.clone() as Arc<dyn Provider>,
    ]));

    let fixture = build_agent(chain, Arc::new(ToolRegistry::new()), default_cfg(), pii_off());
    let response = fixture
        .agent
        .handle_direct_message("c1", "hello")
        .await
        .unwrap();
    assert_eq!(response, "ok");
    assert_eq!(primary.request_count(), 1);
    assert_eq!(secondary.request_count(), 1);
}

#[tokio::test]
async fn fallback_auth_error_aborts_turn() {
    let primary = ScriptedProvider::new(vec![Err((
        ErrorKind::Auth,
        "401 unauthorized".to_string(),
    ))]);
    let secondary = ScriptedProvider::new(vec![ScriptedProvider::text("never")]);
    let chain: Arc<dyn Provider> = Arc::new(FallbackProvider::new(vec![
        primary.clone() as Arc<dyn Provider>,
        secondary.clone() as Arc<dyn Provider>,
    ]));

    let fixture = build_agent(chain, Arc::new(ToolRegistry::new()), default_cfg(), pii_off());
    let err = fixture
        .agent
        .handle_direct_message("c1", "hello")
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("LLM error:"));
    assert!(err.to_string().contains("401"));
    assert_eq!(secondary.request_count(), 0);
}

#[tokio::test]
async fn summarization_round_trip() {
    let mut cfg = default_cfg();
    cfg.summarize_at = 100; // in estimated-token units

    // Preload enough history that the working list trips the trigger.
    let provider = ScriptedProvider::new(vec![
        // First provider call is the summarizer
        ScriptedProvider::text("User greeted; assistant greeted back."),
        // Then the actual chat leg
        ScriptedProvider::text("all caught up"),
    ]);
    let fixture = build_agent(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        cfg,
        pii_off(),
    );

    for i in 0..6 {
        fixture
            .memory
            .save_message("c1", &Message::user(format!("padding {} {}", i, "x".repeat(100))))
            .await
            .unwrap();
    }

    let response = fixture
        .agent
        .handle_direct_message("c1", "and now?")
        .await
        .unwrap();
    assert_eq!(response, "all caught up");

    // The summarizer leg used the dedicated prompt.
    let summarizer_req = provider.request(0);
    assert!(summarizer_req
        .system_prompt
        .contains("conversation summarizer"));

    // The chat leg starts with the summary preamble followed by the
    // kept tail.
    let chat_req = provider.request(1);
    assert_eq!(
        chat_req.messages[0].content,
        "[Conversation summary]: User greeted; assistant greeted back."
    );
    assert_eq!(
        chat_req.messages[1].content,
        "I understand the context. Continuing..."
    );
    assert_eq!(chat_req.messages.len(), 2 + 4);
    assert_eq!(chat_req.messages.last().unwrap().content, "and now?");

    // And the summary was persisted.
    assert_eq!(
        fixture.memory.get_summary("c1").await.unwrap(),
        "User greeted; assistant greeted back."
    );
}

#[tokio::test]
async fn stored_summary_bootstraps_next_turn() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("welcome back")]);
    let fixture = build_agent(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        default_cfg(),
        pii_off(),
    );

    fixture
        .memory
        .save_summary("c1", "We discussed crabs.")
        .await
        .unwrap();

    fixture
        .agent
        .handle_direct_message("c1", "hi again")
        .await
        .unwrap();

    let req = provider.request(0);
    assert_eq!(
        req.messages[0].content,
        "[Previous conversation summary]: We discussed crabs."
    );
    assert_eq!(req.messages[0].role, "user");
    assert_eq!(req.messages[1].role, "assistant");
}

#[tokio::test]
async fn pii_round_trip_through_agent() {
    let pii = PiiFilterConfig {
        enabled: true,
        filter_emails: true,
        filter_phones: false,
        filter_cards: false,
        filter_ips: false,
        filter_ssn: false,
    };
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text(
        "Okay, I will email [EMAIL_1] later.",
    )]);
    let fixture = build_agent(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        default_cfg(),
        pii,
    );

    let response = fixture
        .agent
        .handle_direct_message("c1", "email me at a@b.com")
        .await
        .unwrap();
    assert_eq!(response, "Okay, I will email a@b.com later.");

    // The provider never saw the raw address.
    let req = provider.request(0);
    let user_msg = req.messages.last().unwrap();
    assert_eq!(user_msg.content, "email me at [EMAIL_1]");
    assert!(!user_msg.content.contains("a@b.com"));
}

#[tokio::test]
async fn concurrent_chats_do_not_interleave_persistence() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::text("reply one"),
        ScriptedProvider::text("reply two"),
    ]);
    let fixture = build_agent(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        default_cfg(),
        pii_off(),
    );

    let a = fixture.agent.clone();
    let b = fixture.agent.clone();
    let (ra, rb) = tokio::join!(
        a.handle_direct_message("chat_a", "hello from a"),
        b.handle_direct_message("chat_b", "hello from b"),
    );
    ra.unwrap();
    rb.unwrap();

    for chat in ["chat_a", "chat_b"] {
        let history = fixture.memory.get_history(chat, 50).await.unwrap();
        assert_eq!(history.len(), 2, "{}", chat);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert!(history[0].content.contains(&chat[5..]));
    }
}
