//! AES-128-GCM authenticated encryption of the cached key
//!
//! Keyed by a [`KeyEncryptionKey`]; a tag mismatch is reported as
//! [`CacheError::AuthenticationFailure`] and nothing else.

use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use aes_gcm::Aes128Gcm;
use aes_gcm::Nonce;
use rand::Rng;
use zeroize::Zeroizing;

use super::KeyEncryptionKey;
use super::IV_LEN;
use crate::error::CacheError;
use crate::error::Result;

/// Handles AES-128-GCM encryption/decryption
pub struct KeyCipher {
    cipher: Aes128Gcm,
}

impl KeyCipher {
    /// Create cipher from a derived 128-bit KEK
    pub fn new(kek: &KeyEncryptionKey) -> Result<Self> {
        let cipher = Aes128Gcm::new_from_slice(kek.as_bytes())
            .map_err(|e| CacheError::InvalidConfiguration(format!("invalid AES key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Generate random 96-bit nonce
    pub fn generate_nonce() -> [u8; IV_LEN] {
        let mut nonce = [0u8; IV_LEN];
        rand::rng().fill(&mut nonce);
        nonce
    }

    /// Encrypt plaintext with authenticated encryption
    ///
    /// Returns ciphertext with authentication tag appended
    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; IV_LEN]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);

        self.cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CacheError::InvalidConfiguration(format!("encryption failed: {e}")))
    }

    /// Decrypt ciphertext with authentication verification
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; IV_LEN]) -> Result<Zeroizing<Vec<u8>>> {
        let nonce = Nonce::from_slice(nonce);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CacheError::AuthenticationFailure)
    }
}

impl std::fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyCipher(<redacted>)")
    }
}
