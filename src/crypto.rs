//! Encryption for stored provider API keys.
//!
//! AES-256-GCM with a process-wide master key supplied through the
//! environment. Stored values are `base64(nonce).base64(ciphertext)`.
//! Decryption fails closed: a value that does not decrypt is an error,
//! never passed through as a legacy plaintext key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("master key must be 32 bytes of base64")]
    InvalidMasterKey,
    #[error("stored key value is malformed")]
    MalformedCiphertext,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed; the stored key cannot be recovered")]
    DecryptFailed,
}

pub struct KeyCipher {
    cipher: Aes256Gcm,
}

impl KeyCipher {
    pub fn new(master_key_b64: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(master_key_b64)
            .map_err(|_| CryptoError::InvalidMasterKey)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidMasterKey);
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| CryptoError::InvalidMasterKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;
        Ok(format!(
            "{}.{}",
            STANDARD.encode(nonce_bytes),
            STANDARD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let (nonce_b64, ciphertext_b64) = stored
            .split_once('.')
            .ok_or(CryptoError::MalformedCiphertext)?;
        let nonce_bytes = STANDARD
            .decode(nonce_b64)
            .map_err(|_| CryptoError::MalformedCiphertext)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|_| CryptoError::MalformedCiphertext)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }
}
