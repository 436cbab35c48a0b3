//! Credential vault: symmetric encryption of tenant provider secrets at rest.
//!
//! AES-256-GCM with a fresh random 96-bit IV per call. The key is the first
//! 32 bytes of the configured passphrase. Ciphertext and IV are stored as
//! lowercase hex; the GCM tag is appended to the ciphertext, so tampered or
//! truncated records fail to decrypt instead of yielding garbage.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};

use crate::error::PayError;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM IV length in bytes.
pub const IV_LEN: usize = 12;

/// An encrypted secret as persisted: `{ "iv": "<hex>", "encryptedData": "<hex>" }`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSecret {
    #[serde(default)]
    pub iv: String,
    #[serde(default)]
    pub encrypted_data: String,
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("iv", &self.iv)
            .field("encrypted_data", &format!("[{} hex chars]", self.encrypted_data.len()))
            .finish()
    }
}

/// Symmetric encrypt/decrypt boundary for provider secrets.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("key", &"[REDACTED]").finish()
    }
}

impl Vault {
    /// Build a vault from a passphrase, truncated to the 32-byte AES-256 key.
    ///
    /// Passphrases shorter than 32 bytes are rejected rather than padded.
    pub fn new(passphrase: &[u8]) -> Result<Self, PayError> {
        if passphrase.len() < KEY_LEN {
            return Err(PayError::Config(format!(
                "vault passphrase must be at least {KEY_LEN} bytes (got {})",
                passphrase.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&passphrase[..KEY_LEN])
            .map_err(|_| PayError::Vault("invalid key length".to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext`. Returns `None` for empty input.
    pub fn encrypt(&self, plaintext: &str) -> Option<EncryptedSecret> {
        if plaintext.is_empty() {
            return None;
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        match self.cipher.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => Some(EncryptedSecret {
                iv: hex::encode(nonce),
                encrypted_data: hex::encode(ciphertext),
            }),
            Err(_) => {
                tracing::error!("vault encryption failed");
                None
            }
        }
    }

    /// Decrypt a stored secret. Returns `None` if either field is missing or
    /// malformed, if authentication fails, or if the plaintext is not UTF-8.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Option<String> {
        if secret.iv.is_empty() || secret.encrypted_data.is_empty() {
            return None;
        }
        let iv = hex::decode(&secret.iv).ok()?;
        if iv.len() != IV_LEN {
            return None;
        }
        let ciphertext = hex::decode(&secret.encrypted_data).ok()?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .ok()?;
        String::from_utf8(plaintext).ok()
    }

    /// Encrypt an optional field, treating `None` like empty input.
    pub fn seal(&self, plaintext: Option<&str>) -> Option<EncryptedSecret> {
        plaintext.and_then(|p| self.encrypt(p))
    }

    /// Decrypt an optional field.
    pub fn open(&self, secret: Option<&EncryptedSecret>) -> Option<String> {
        secret.and_then(|s| self.decrypt(s))
    }
}
