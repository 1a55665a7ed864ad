//! At-rest encryption for channel-URL passwords.
//!
//! AES-256-GCM with a key derived from the operator-provided secret. The
//! random nonce is prepended to the ciphertext and the whole record is
//! base64-encoded for storage in a TEXT column.

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts password blobs with a key derived from a secret.
#[derive(Clone)]
pub struct PasswordCipher {
    key: [u8; 32],
}

impl PasswordCipher {
    /// Derive the cipher key from an operator secret.
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"tubarr-password-key:");
        hasher.update(secret.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::fatal("password encryption failed"))?;

        let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(record))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let record = BASE64
            .decode(encoded)
            .map_err(|e| Error::fatal(format!("corrupt password record: {e}")))?;
        if record.len() < NONCE_LEN {
            return Err(Error::fatal("corrupt password record: too short"));
        }

        let (nonce, ciphertext) = record.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::fatal("password decryption failed"))?;

        String::from_utf8(plaintext).map_err(|e| Error::fatal(format!("corrupt password: {e}")))
    }
}
