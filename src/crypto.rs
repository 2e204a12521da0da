//! Envelope encryption for stored third-party tokens.
//!
//! The cipher key is derived from a deployment secret with SHA-256; values
//! are sealed with XChaCha20-Poly1305 under a random 24-byte nonce and stored
//! as `base64(nonce || ciphertext)`. Plaintext tokens never reach the
//! database.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of the XChaCha20 nonce prefixed to each ciphertext.
const NONCE_LEN: usize = 24;

/// Symmetric cipher for credential values.
///
/// Debug output never includes key material.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenCipher {
    /// Derive a cipher from a deployment secret.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Seal a plaintext value, returning `base64(nonce || ciphertext)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Credential("token encryption failed".to_owned()))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Open a sealed value produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] when the value is malformed or was
    /// sealed under a different secret.
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let raw = BASE64
            .decode(sealed.as_bytes())
            .map_err(|_| Error::Credential("stored token is not valid base64".to_owned()))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Credential("stored token is truncated".to_owned()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = XNonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Credential("token decryption failed".to_owned()))?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Credential("decrypted token is not UTF-8".to_owned()))
    }
}
