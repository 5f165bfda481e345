use crate::errors::OpendanError;
use crate::security::crypto;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Service name under which entries live in the OS credential manager.
const KEYRING_SERVICE: &str = "opendan";
pub const VAULT_FILE: &str = "vault.enc";

/// Named secret storage. Primary backend is the OS keychain; when that
/// errors (headless hosts, locked keychains) operations fall back to an
/// AES-256-GCM encrypted JSON vault on disk. Deletion hits both.
pub struct SecretStore {
    vault_path: PathBuf,
    encryption_key: Option<[u8; crypto::KEY_LEN]>,
    use_keyring: bool,
}

impl SecretStore {
    /// `encryption_key` unlocks the vault fallback; pass `None` to run
    /// keyring-only.
    pub fn new(state_dir: PathBuf, encryption_key: Option<[u8; crypto::KEY_LEN]>) -> Result<Self> {
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating state dir {}", state_dir.display()))?;
        Ok(Self {
            vault_path: state_dir.join(VAULT_FILE),
            encryption_key,
            use_keyring: true,
        })
    }

    /// Vault-only store for hosts without a usable credential manager.
    pub fn vault_only(state_dir: PathBuf, encryption_key: [u8; crypto::KEY_LEN]) -> Self {
        Self {
            vault_path: state_dir.join(VAULT_FILE),
            encryption_key: Some(encryption_key),
            use_keyring: false,
        }
    }

    pub fn set(&self, name: &str, value: &str) -> Result<(), OpendanError> {
        if self.use_keyring {
            if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, name) {
                if entry.set_password(value).is_ok() {
                    return Ok(());
                }
            }
            debug!("keyring set failed for '{}', using vault", name);
        }
        self.set_in_vault(name, value).map_err(OpendanError::from)
    }

    pub fn get(&self, name: &str) -> Result<String, OpendanError> {
        if self.use_keyring {
            if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, name) {
                if let Ok(value) = entry.get_password() {
                    return Ok(value);
                }
            }
        }
        self.get_from_vault(name)
    }

    pub fn delete(&self, name: &str) -> Result<(), OpendanError> {
        if self.use_keyring {
            if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, name) {
                let _ = entry.delete_password();
            }
        }
        self.delete_from_vault(name).map_err(OpendanError::from)
    }

    // Vault operations (encrypted JSON map on disk)

    fn load_vault(&self) -> Result<HashMap<String, String>> {
        let data = match std::fs::read_to_string(&self.vault_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        let key = self
            .encryption_key
            .as_ref()
            .ok_or_else(|| anyhow!("no encryption key set"))?;

        let plaintext = crypto::decrypt(&data, key).context("decrypt vault")?;
        serde_json::from_slice(&plaintext).context("parse vault")
    }

    fn save_vault(&self, vault: &HashMap<String, String>) -> Result<()> {
        let key = self
            .encryption_key
            .as_ref()
            .ok_or_else(|| anyhow!("no encryption key set"))?;

        let plaintext = serde_json::to_vec(vault)?;
        let sealed = crypto::encrypt(&plaintext, key)?;
        write_private(&self.vault_path, sealed.as_bytes())
    }

    fn set_in_vault(&self, name: &str, value: &str) -> Result<()> {
        let mut vault = self.load_vault().unwrap_or_default();
        vault.insert(name.to_string(), value.to_string());
        self.save_vault(&vault)
    }

    fn get_from_vault(&self, name: &str) -> Result<String, OpendanError> {
        let vault = self.load_vault()?;
        vault
            .get(name)
            .cloned()
            .ok_or_else(|| OpendanError::SecretNotFound(name.to_string()))
    }

    fn delete_from_vault(&self, name: &str) -> Result<()> {
        let Ok(mut vault) = self.load_vault() else {
            return Ok(()); // nothing to delete
        };
        if vault.remove(name).is_some() {
            self.save_vault(&vault)?;
        }
        Ok(())
    }
}

fn write_private(path: &std::path::Path, data: &[u8]) -> Result<()> {
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
        file.write_all(data)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data)?;
    }
    Ok(())
}

/// Cosmetic masking for displaying API keys.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    format!("{}...{}", &key[..3], &key[key.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(dir: &std::path::Path) -> SecretStore {
        let key = crypto::derive_key("master-password", b"0123456789abcdef").unwrap();
        SecretStore::vault_only(dir.to_path_buf(), key)
    }

    #[test]
    fn set_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        store.set("llm_api_key", "sk-12345").unwrap();
        assert_eq!(store.get("llm_api_key").unwrap(), "sk-12345");

        store.delete("llm_api_key").unwrap();
        assert!(matches!(
            store.get("llm_api_key"),
            Err(OpendanError::SecretNotFound(_))
        ));
    }

    #[test]
    fn set_replaces_existing_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        store.set("token", "old").unwrap();
        store.set("token", "new").unwrap();
        assert_eq!(store.get("token").unwrap(), "new");
    }

    #[test]
    fn vault_file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        store.set("token", "super-secret-value").unwrap();

        let raw = std::fs::read_to_string(dir.path().join(VAULT_FILE)).unwrap();
        assert!(!raw.contains("super-secret-value"));
        assert!(!raw.contains("token"));
    }

    #[test]
    fn vault_survives_reopen_with_same_key() {
        let dir = tempfile::tempdir().unwrap();
        test_store(dir.path()).set("token", "persisted").unwrap();

        let reopened = test_store(dir.path());
        assert_eq!(reopened.get("token").unwrap(), "persisted");
    }

    #[test]
    fn wrong_key_cannot_open_vault() {
        let dir = tempfile::tempdir().unwrap();
        test_store(dir.path()).set("token", "v").unwrap();

        let wrong = crypto::derive_key("other-password", b"0123456789abcdef").unwrap();
        let store = SecretStore::vault_only(dir.path().to_path_buf(), wrong);
        assert!(store.get("token").is_err());
    }

    #[test]
    fn delete_missing_secret_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        assert!(store.delete("never-existed").is_ok());
    }

    #[test]
    fn mask_key_short_and_long() {
        assert_eq!(mask_key(""), "****");
        assert_eq!(mask_key("abcd1234"), "****");
        assert_eq!(mask_key("sk-abcdefgh1234"), "sk-...1234");
    }
}
