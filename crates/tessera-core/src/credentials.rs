//! Credential codec for per-tenant database credentials
//!
//! Uses AES-256-GCM authenticated encryption. Credentials are stored and
//! cached only as encrypted blobs; `decrypt_credentials` is called inside
//! pool build and the plaintext is dropped as soon as connect options exist.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use std::env;

use crate::error::RouterError;
use crate::models::DbCredentials;

/// Symmetric encrypt/decrypt of stored per-tenant database credentials.
#[derive(Clone)]
pub struct CredentialCodec {
    cipher: Aes256Gcm,
}

impl CredentialCodec {
    /// Create a codec from a raw 32-byte key (e.g. for tests; avoids env mutation).
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, RouterError> {
        if key_bytes.len() != 32 {
            return Err(RouterError::Crypto(
                "Encryption key must be 32 bytes (256 bits)".to_string(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Create a codec from the environment.
    /// Expects ENCRYPTION_KEY to be a base64-encoded 32-byte key.
    pub fn from_env() -> Result<Self, RouterError> {
        let key_str = env::var("ENCRYPTION_KEY").map_err(|_| {
            RouterError::Config("ENCRYPTION_KEY environment variable not set".to_string())
        })?;

        let key_bytes = general_purpose::STANDARD
            .decode(&key_str)
            .map_err(|e| RouterError::Config(format!("Failed to decode encryption key: {}", e)))?;

        Self::from_key_bytes(&key_bytes)
    }

    /// Encrypt a plaintext string
    pub fn encrypt(&self, plaintext: &str) -> Result<String, RouterError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| RouterError::Crypto(format!("Encryption failed: {}", e)))?;

        // Combine nonce and ciphertext, then base64 encode
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt an encrypted string
    pub fn decrypt(&self, encrypted: &str) -> Result<String, RouterError> {
        let combined = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| RouterError::Crypto(format!("Failed to decode encrypted data: {}", e)))?;

        if combined.len() < 12 {
            return Err(RouterError::Crypto("Encrypted data too short".to_string()));
        }

        // Extract nonce (first 12 bytes) and ciphertext (rest)
        let nonce = Nonce::from_slice(&combined[..12]);
        let ciphertext = &combined[12..];

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| RouterError::Crypto(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| RouterError::Crypto(format!("Invalid UTF-8 in decrypted data: {}", e)))
    }

    /// Encrypt a credential pair into a storable blob.
    pub fn encrypt_credentials(&self, creds: &DbCredentials) -> Result<String, RouterError> {
        let json = serde_json::to_string(creds)
            .map_err(|e| RouterError::Crypto(format!("Failed to serialize credentials: {}", e)))?;
        self.encrypt(&json)
    }

    /// Decrypt a stored blob back into a credential pair.
    ///
    /// Callers must not hold the result beyond building connect options.
    pub fn decrypt_credentials(&self, blob: &str) -> Result<DbCredentials, RouterError> {
        let json = self.decrypt(blob)?;
        serde_json::from_str(&json)
            .map_err(|e| RouterError::Crypto(format!("Failed to parse credentials: {}", e)))
    }
}
