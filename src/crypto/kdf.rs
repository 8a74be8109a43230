//! PBKDF2 key derivation for wrapping the cached key
//!
//! The derived key is only ever used as an AES-GCM key for the cached secret,
//! never directly on user data.

use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha1::Sha1;

use super::Passphrase;
use super::KEK_LEN;
use super::SALT_LEN;
use crate::error::CacheError;
use crate::error::Result;
use crate::wipe;

/// Key-encryption-key derived from a passphrase (zeroed on drop)
pub struct KeyEncryptionKey {
    key: [u8; KEK_LEN],
}

const TRACKING_LABEL: &str = "key-encryption-key";

impl KeyEncryptionKey {
    /// Derive a KEK from `passphrase` with PBKDF2-HMAC-SHA1.
    ///
    /// Deterministic for identical inputs. The passphrase is borrowed and
    /// left to the caller to wipe.
    pub fn derive(passphrase: &Passphrase, salt: &[u8; SALT_LEN], iterations: u32) -> Result<Self> {
        if iterations == 0 {
            return Err(CacheError::InvalidConfiguration(
                "kdf iteration count must be positive".to_string(),
            ));
        }

        let mut kek = Self { key: [0u8; KEK_LEN] };
        wipe::track_created(TRACKING_LABEL);
        pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), salt, iterations, &mut kek.key);

        Ok(kek)
    }

    /// Generate a random salt for a new ciphertext
    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill(&mut salt);
        salt
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEK_LEN] {
        &self.key
    }
}

impl Drop for KeyEncryptionKey {
    fn drop(&mut self) {
        wipe::wipe_tracked(TRACKING_LABEL, &mut self.key);
        tracing::trace!("wiped key-encryption-key");
    }
}

impl std::fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyEncryptionKey(<redacted>)")
    }
}
