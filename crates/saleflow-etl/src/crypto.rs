//! Field-level encryption: AES-256-GCM over individual column values.
//!
//! Ciphertext is written as lowercase hex of `nonce (12 bytes) || ciphertext`,
//! so the text normalization step that runs after encryption leaves it intact.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{EtlError, EtlResult};

const NONCE_LEN: usize = 12;

/// Encrypts single field values with a configured key
#[derive(Clone)]
pub struct FieldEncryptor {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldEncryptor { .. }")
    }
}

impl FieldEncryptor {
    pub fn from_key(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build from a base64 key (standard or URL-safe alphabet) decoding to
    /// exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> EtlResult<Self> {
        let encoded = encoded.trim();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(encoded))
            .map_err(|e| EtlError::config(format!("Encryption key is not valid base64: {e}")))?;

        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            EtlError::config(format!(
                "Encryption key must decode to 32 bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Self::from_key(&key))
    }

    pub fn encrypt(&self, plaintext: &str) -> EtlResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| EtlError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> EtlResult<String> {
        let data = hex::decode(encoded).map_err(|e| EtlError::Encryption(e.to_string()))?;
        if data.len() < NONCE_LEN {
            return Err(EtlError::Encryption("ciphertext shorter than nonce".into()));
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| EtlError::Encryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| EtlError::Encryption(e.to_string()))
    }
}

/// Whether encrypt-flagged columns are actually encrypted.
///
/// `Disabled` is a supported deployment mode, selected by leaving the key
/// unset, and passes values through untouched.
#[derive(Debug, Clone, Default)]
pub enum EncryptionMode {
    #[default]
    Disabled,
    Enabled(FieldEncryptor),
}

impl EncryptionMode {
    pub fn from_key(key: Option<&str>) -> EtlResult<Self> {
        match key {
            Some(key) => Ok(Self::Enabled(FieldEncryptor::from_base64(key)?)),
            None => Ok(Self::Disabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, EncryptionMode::Enabled(_))
    }

    pub fn apply(&self, value: String) -> EtlResult<String> {
        match self {
            EncryptionMode::Disabled => Ok(value),
            EncryptionMode::Enabled(encryptor) => encryptor.encrypt(&value),
        }
    }
}
