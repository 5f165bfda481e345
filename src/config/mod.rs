pub mod loader;
pub mod schema;

pub use loader::{
    state_dir, validate_base_url, validate_workspace, ConfigLoader, KEYRING_SENTINEL,
    SECRET_FALLBACK_API_KEY, SECRET_LLM_API_KEY, SECRET_TELEGRAM_TOKEN,
};
pub use schema::{
    AgentConfig, BrowserConfig, ChannelsConfig, Config, LlmConfig, PiiFilterConfig, PluginsConfig,
    SandboxConfig, SecurityConfig, TelegramConfig,
};
