use crate::agent::Agent;
use crate::bus::EventBus;
use crate::channels::console::ConsoleChannel;
use crate::channels::telegram::TelegramChannel;
use crate::channels::ChannelManager;
use crate::config::{self, Config, ConfigLoader};
use crate::memory::{Memory, SqliteMemory};
use crate::providers::base::{ChatRequest, Message};
use crate::providers::build_provider_chain;
use crate::security::{crypto, Sanitizer, SecretStore};
use crate::skills::SkillLoader;
use crate::tools::browser::BrowserTool;
use crate::tools::filesystem::FilesystemTool;
use crate::tools::shell::ShellTool;
use crate::tools::web_search::WebSearchTool;
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "opendan", version, about = "Autonomous conversational agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the agent daemon (default)
    Run,
    /// Verify the configured LLM provider responds
    Test,
}

pub async fn run() -> Result<()> {
    match Cli::parse().command.unwrap_or(Command::Run) {
        Command::Run => run_daemon().await,
        Command::Test => test_provider().await,
    }
}

fn open_secret_store(state_dir: &std::path::Path) -> Result<SecretStore> {
    // The vault fallback needs a key; derive one from the master
    // password when provided, with a per-install salt.
    let vault_key = match std::env::var("OPENDAN_MASTER_PASSWORD") {
        Ok(password) if !password.is_empty() => {
            let salt_path = state_dir.join("vault.salt");
            let salt = if salt_path.exists() {
                std::fs::read(&salt_path).context("reading vault salt")?
            } else {
                std::fs::create_dir_all(state_dir)?;
                let salt = crypto::generate_salt().to_vec();
                std::fs::write(&salt_path, &salt).context("writing vault salt")?;
                salt
            };
            Some(crypto::derive_key(&password, &salt)?)
        }
        _ => None,
    };
    SecretStore::new(state_dir.to_path_buf(), vault_key)
}

fn load_config(state_dir: &std::path::Path) -> Result<(Config, SecretStore)> {
    let secrets = open_secret_store(state_dir)?;
    let loader = ConfigLoader::new()?;
    let cfg = loader.load(&secrets)?;
    Ok((cfg, secrets))
}

fn workspace_dir(cfg: &Config, state_dir: &std::path::Path) -> PathBuf {
    cfg.security
        .sandbox
        .workspace_dir
        .as_ref()
        .map_or_else(|| state_dir.join("workspace"), PathBuf::from)
}

async fn run_daemon() -> Result<()> {
    let state_dir = config::state_dir()?;
    let (cfg, _secrets) = load_config(&state_dir)?;

    let workspace = workspace_dir(&cfg, &state_dir);
    config::validate_workspace(&workspace)?;

    let memory: Arc<dyn Memory> = Arc::new(SqliteMemory::open(state_dir.join("memory.db"))?);
    let bus = Arc::new(EventBus::new());
    let sanitizer = Arc::new(Sanitizer::new(&cfg.security.pii_filtering));

    // Tools
    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(ShellTool::new(
        workspace.clone(),
        &cfg.security.sandbox,
    )));
    tools.register(Arc::new(FilesystemTool::new(workspace.clone())));
    tools.register(Arc::new(WebSearchTool::new()));

    let browser = if cfg.browser.enabled {
        let browser = Arc::new(BrowserTool::new(cfg.browser.clone()));
        tools.register(browser.clone());
        Some(browser)
    } else {
        None
    };

    if cfg.plugins.enabled {
        let skills_dir = cfg
            .plugins
            .skills_dir
            .as_ref()
            .map_or_else(|| state_dir.join("skills"), PathBuf::from);
        let loader = SkillLoader::new(
            skills_dir,
            cfg.plugins.timeout_secs,
            cfg.plugins.sandbox_enabled,
        );
        let skills = loader.load_all(&cfg.plugins.enabled_skills);
        info!("loaded {} skill(s)", skills.len());
        for skill in skills {
            tools.register(skill);
        }
    }

    // Provider chain
    let provider = build_provider_chain(&cfg.llm, cfg.fallback_llm.as_ref())?;
    info!(
        "provider: {} (model: {})",
        provider.name(),
        provider.default_model()
    );

    // Channels
    let channels = Arc::new(ChannelManager::new());
    channels.register(Arc::new(ConsoleChannel::new()));
    if let Some(telegram_cfg) = &cfg.channels.telegram {
        if telegram_cfg.token.is_empty() {
            warn!("telegram configured without a token, skipping");
        } else {
            channels.register(Arc::new(TelegramChannel::new(telegram_cfg)));
        }
    }

    let agent = Arc::new(Agent::new(
        cfg.agent.clone(),
        provider,
        tools,
        memory.clone(),
        bus,
        channels.clone(),
        sanitizer,
    ));

    agent.attach_channels();
    channels.start_all().await?;
    info!("opendan {} ready", crate::VERSION);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    channels.stop_all().await;
    if let Some(browser) = browser {
        browser.close_all().await;
    }
    memory.close();
    Ok(())
}

async fn test_provider() -> Result<()> {
    let state_dir = config::state_dir()?;
    let (cfg, _secrets) = load_config(&state_dir)?;

    let provider = build_provider_chain(&cfg.llm, cfg.fallback_llm.as_ref())?;
    let req = ChatRequest {
        messages: vec![Message::user("Say 'OK' if you can hear me.")],
        max_tokens: 32,
        ..Default::default()
    };

    provider
        .chat(&req)
        .await
        .map_err(|e| anyhow::anyhow!("provider check failed: {}", e))?;
    println!("provider {} responded", provider.name());
    Ok(())
}
