use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::{anyhow, bail, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;

const ARGON_TIME: u32 = 3;
const ARGON_MEMORY_KIB: u32 = 64 * 1024; // 64 MiB
const ARGON_PARALLELISM: u32 = 4;
pub const KEY_LEN: usize = 32; // AES-256
pub const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12; // GCM standard nonce size

/// Derive an AES-256 key from a password using Argon2id.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let params = Params::new(ARGON_MEMORY_KIB, ARGON_TIME, ARGON_PARALLELISM, Some(KEY_LEN))
        .map_err(|e| anyhow!("argon2 params: {}", e))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow!("argon2 derive: {}", e))?;
    Ok(key)
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Encrypt with AES-256-GCM. Returns base64 of nonce || ciphertext.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("create cipher: {}", e))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| anyhow!("encryption failed"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

/// Decrypt base64-encoded AES-256-GCM ciphertext (nonce prepended).
pub fn decrypt(encoded: &str, key: &[u8]) -> Result<Vec<u8>> {
    let data = BASE64
        .decode(encoded.trim())
        .map_err(|e| anyhow!("decode base64: {}", e))?;

    if data.len() < NONCE_LEN {
        bail!("ciphertext too short");
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("create cipher: {}", e))?;
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| anyhow!("decrypt: authentication failed"))
}
