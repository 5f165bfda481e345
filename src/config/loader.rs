use crate::config::schema::Config;
use crate::errors::OpendanError;
use crate::security::SecretStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".opendan";
const CONFIG_FILE: &str = "config.json";

/// On-disk stand-in for secret values. The real value lives in the
/// secret store; the file only ever carries this marker.
pub const KEYRING_SENTINEL: &str = "[keyring]";

pub const SECRET_LLM_API_KEY: &str = "llm_api_key";
pub const SECRET_FALLBACK_API_KEY: &str = "fallback_llm_api_key";
pub const SECRET_TELEGRAM_TOKEN: &str = "telegram_token";

/// Per-user state directory (`~/.opendan`).
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(CONFIG_DIR))
}

/// Reads and writes the configuration file, swapping secret fields
/// against the secret store so plaintext never persists on disk.
pub struct ConfigLoader {
    file_path: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let dir = state_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating config dir {}", dir.display()))?;
        Ok(Self {
            file_path: dir.join(CONFIG_FILE),
        })
    }

    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Load the config, resolving secret sentinels from the store. A
    /// pre-existing plaintext secret is migrated into the store and the
    /// file is rewritten with the sentinel.
    pub fn load(&self, secrets: &SecretStore) -> Result<Config> {
        let mut config = match std::fs::read_to_string(&self.file_path) {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("parsing {}", self.file_path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config file, using defaults");
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut migrated = false;
        migrated |= resolve_secret(
            &mut config.llm.api_key,
            SECRET_LLM_API_KEY,
            secrets,
        );
        if let Some(fallback) = config.fallback_llm.as_mut() {
            migrated |= resolve_secret(&mut fallback.api_key, SECRET_FALLBACK_API_KEY, secrets);
        }
        if let Some(telegram) = config.channels.telegram.as_mut() {
            migrated |= resolve_secret_string(
                &mut telegram.token,
                SECRET_TELEGRAM_TOKEN,
                secrets,
            );
        }

        // Write back only when a plaintext secret was just migrated,
        // so pre-existing configs converge to sentinel form.
        if migrated {
            info!("migrated plaintext secrets into the secret store");
            if let Err(e) = self.save(&config, secrets) {
                warn!("failed to write back migrated config: {}", e);
            }
        }

        Ok(config)
    }

    /// Persist the config. Real secret values go to the secret store;
    /// the file carries sentinels.
    pub fn save(&self, config: &Config, secrets: &SecretStore) -> Result<()> {
        let mut on_disk = config.clone();

        stash_secret(&mut on_disk.llm.api_key, SECRET_LLM_API_KEY, secrets);
        if let Some(fallback) = on_disk.fallback_llm.as_mut() {
            stash_secret(&mut fallback.api_key, SECRET_FALLBACK_API_KEY, secrets);
        }
        if let Some(telegram) = on_disk.channels.telegram.as_mut() {
            if !telegram.token.is_empty() && telegram.token != KEYRING_SENTINEL {
                if let Err(e) = secrets.set(SECRET_TELEGRAM_TOKEN, &telegram.token) {
                    warn!("failed to store telegram token: {}", e);
                } else {
                    telegram.token = KEYRING_SENTINEL.to_string();
                }
            }
        }

        let data = serde_json::to_string_pretty(&on_disk)?;
        write_private(&self.file_path, data.as_bytes())
            .with_context(|| format!("writing {}", self.file_path.display()))
    }
}

/// Swap a sentinel for the live secret, or migrate a plaintext value
/// into the store. Returns true when a migration happened.
fn resolve_secret(field: &mut Option<String>, name: &str, secrets: &SecretStore) -> bool {
    match field.as_deref() {
        Some(KEYRING_SENTINEL) => {
            match secrets.get(name) {
                Ok(value) => *field = Some(value),
                Err(e) => {
                    warn!("secret '{}' unavailable: {}", name, e);
                    *field = None;
                }
            }
            false
        }
        Some(plaintext) if !plaintext.is_empty() => {
            if let Err(e) = secrets.set(name, plaintext) {
                warn!("failed to migrate secret '{}': {}", name, e);
                return false;
            }
            true
        }
        _ => false,
    }
}

fn resolve_secret_string(field: &mut String, name: &str, secrets: &SecretStore) -> bool {
    if field == KEYRING_SENTINEL {
        match secrets.get(name) {
            Ok(value) => *field = value,
            Err(e) => {
                warn!("secret '{}' unavailable: {}", name, e);
                field.clear();
            }
        }
        false
    } else if !field.is_empty() {
        if let Err(e) = secrets.set(name, field) {
            warn!("failed to migrate secret '{}': {}", name, e);
            return false;
        }
        true
    } else {
        false
    }
}

fn stash_secret(field: &mut Option<String>, name: &str, secrets: &SecretStore) {
    if let Some(value) = field.as_deref() {
        if !value.is_empty() && value != KEYRING_SENTINEL {
            if let Err(e) = secrets.set(name, value) {
                warn!("failed to store secret '{}': {}", name, e);
            } else {
                *field = Some(KEYRING_SENTINEL.to_string());
            }
        }
    }
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(data)
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data)
    }
}

/// Base-URL validation: must parse, scheme http/https, non-empty host.
pub fn validate_base_url(url: &str) -> Result<(), OpendanError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| OpendanError::Config(format!("invalid base URL: {}", e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(OpendanError::Config(format!(
            "base URL must be http or https, got: {}",
            parsed.scheme()
        )));
    }

    if parsed.host_str().unwrap_or_default().is_empty() {
        return Err(OpendanError::Config("base URL has no host".to_string()));
    }

    Ok(())
}

/// Workspace validation: non-empty, not `/` or the home directory,
/// created if missing.
pub fn validate_workspace(dir: &Path) -> Result<(), OpendanError> {
    if dir.as_os_str().is_empty() {
        return Err(OpendanError::Config(
            "workspace directory is empty".to_string(),
        ));
    }

    let home = dirs::home_dir().unwrap_or_default();
    if dir == Path::new("/") || dir == home {
        return Err(OpendanError::Config(
            "cannot use root or home directory as workspace".to_string(),
        ));
    }

    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .map_err(|e| OpendanError::Config(format!("cannot create workspace: {}", e)))?;
    } else if !dir.is_dir() {
        return Err(OpendanError::Config(
            "workspace path is not a directory".to_string(),
        ));
    }

    Ok(())
}
