//! Byte layout of a persisted, passphrase-wrapped secret.
//!
//! All integers are big-endian.
//!
//! ```text
//! v0 (legacy): version=0 (u32) | salt (16) | iv (12) | ciphertext+tag
//! v1:          version=1 (u32) | iterations (u32) | salt (16) | iv (12) | ciphertext+tag
//! ```
//!
//! v0 blobs carry no iteration count; they were always written with
//! [`LEGACY_KDF_ITERATIONS`]. Only v1 is ever written by new code.

use bytes::Buf;
use bytes::BufMut;

use super::IV_LEN;
use super::SALT_LEN;
use super::TAG_LEN;
use crate::error::CacheError;
use crate::error::Result;

pub const FORMAT_VERSION_LEGACY: u32 = 0;
pub const FORMAT_VERSION_CURRENT: u32 = 1;

/// Iteration count implied by a v0 blob.
pub const LEGACY_KDF_ITERATIONS: u32 = 100;

/// A wrapped secret together with everything needed to unwrap it, except
/// the passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedSecret {
    pub format_version: u32,
    pub kdf_iterations: u32,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    /// ciphertext with the GCM tag appended
    pub ciphertext: Vec<u8>,
}

impl SerializedSecret {
    /// A secret in the current format.
    pub fn new(kdf_iterations: u32, salt: [u8; SALT_LEN], iv: [u8; IV_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            format_version: FORMAT_VERSION_CURRENT,
            kdf_iterations,
            salt,
            iv,
            ciphertext,
        }
    }

    /// Parse either layout.
    ///
    /// Never panics: short input is [`CacheError::MalformedSecret`] and an
    /// unknown leading version is [`CacheError::UnsupportedFormatVersion`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;

        if buf.remaining() < 4 {
            return Err(malformed(format!("{} bytes is too short for a version tag", bytes.len())));
        }
        let format_version = buf.get_u32();

        let kdf_iterations = match format_version {
            FORMAT_VERSION_LEGACY => LEGACY_KDF_ITERATIONS,
            FORMAT_VERSION_CURRENT => {
                if buf.remaining() < 4 {
                    return Err(malformed("truncated iteration count".to_string()));
                }
                match buf.get_u32() {
                    0 => return Err(malformed("iteration count is zero".to_string())),
                    n => n,
                }
            }
            other => return Err(CacheError::UnsupportedFormatVersion(other)),
        };

        if buf.remaining() < SALT_LEN + IV_LEN + TAG_LEN {
            return Err(malformed(format!(
                "{} bytes left after header, need at least {}",
                buf.remaining(),
                SALT_LEN + IV_LEN + TAG_LEN
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        buf.copy_to_slice(&mut salt);
        let mut iv = [0u8; IV_LEN];
        buf.copy_to_slice(&mut iv);

        Ok(Self {
            format_version,
            kdf_iterations,
            salt,
            iv,
            ciphertext: buf.to_vec(),
        })
    }

    /// Serialize in the layout named by `format_version`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());

        out.put_u32(self.format_version);
        if self.format_version != FORMAT_VERSION_LEGACY {
            out.put_u32(self.kdf_iterations);
        }
        out.put_slice(&self.salt);
        out.put_slice(&self.iv);
        out.put_slice(&self.ciphertext);

        out
    }

    pub fn is_legacy(&self) -> bool {
        self.format_version == FORMAT_VERSION_LEGACY
    }

    /// True if this secret should be rewritten with a fresh iteration count
    /// after a successful unlock.
    pub fn needs_upgrade(&self, min_iterations: u32) -> bool {
        self.is_legacy() || self.kdf_iterations < min_iterations
    }

    fn encoded_len(&self) -> usize {
        let header = if self.is_legacy() { 4 } else { 8 };
        header + SALT_LEN + IV_LEN + self.ciphertext.len()
    }
}

fn malformed(reason: String) -> CacheError {
    CacheError::MalformedSecret(reason)
}
