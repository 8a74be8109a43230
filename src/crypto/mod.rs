//! Passphrase-based protection of the cached key using PBKDF2 + AES-GCM
//!
//! This module turns a user passphrase into a key-encryption-key (KEK), uses
//! that KEK to wrap a random 256-bit key, and owns the byte layout the
//! wrapped key is persisted in.
//!
//! ## Security Properties
//!
//! - **Key Derivation**: PBKDF2-HMAC-SHA1, 128-bit output, iteration count
//!   calibrated to the host and recorded next to every ciphertext
//! - **Encryption**: AES-128-GCM keyed by the KEK (authenticated encryption)
//! - **Wrong passphrase detection**: only via the GCM tag, there is no
//!   separate verifier stored on disk
//! - **Memory Safety**: passphrases, KEKs and the cached key live in
//!   zeroize-on-drop buffers
//!
//! ## Architecture
//!
//! ```text
//! User Passphrase (UTF-8)
//!     ↓ PBKDF2-HMAC-SHA1 (random 128-bit salt, calibrated iterations)
//! Key-Encryption-Key (128 bits)
//!     ↓ AES-128-GCM (random 96-bit nonce)
//! Wrapped Secret Key (256 bits + 128-bit tag)
//!     ↓ SerializedSecret v1
//! version | iterations | salt | iv | ciphertext
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use cacheword::config::settings::KdfSettings;
//! use cacheword::crypto::{Passphrase, PassphraseSecrets};
//!
//! # fn main() -> cacheword::error::Result<()> {
//! let kdf = KdfSettings::default();
//! let (secrets, serialized) =
//!     PassphraseSecrets::initialize(Passphrase::try_from("hunter2")?, &kdf)?;
//! let blob = serialized.to_bytes();
//!
//! let fetched = PassphraseSecrets::fetch(Passphrase::try_from("hunter2")?, &blob, &kdf)?;
//! assert_eq!(secrets.secret_key(), fetched.secrets.secret_key());
//! # Ok(())
//! # }
//! ```

// Re-export public API
pub use calibrator::{iterations_for_new_secret, KdfIterationCalibrator};
pub use cipher::KeyCipher;
pub use format::SerializedSecret;
pub use kdf::KeyEncryptionKey;
pub use passphrase::Passphrase;
pub use passphrase_secrets::{FetchedSecrets, PassphraseSecrets, SecretKey};

pub mod calibrator;
mod cipher;
pub mod format;
mod kdf;
mod passphrase;
mod passphrase_secrets;

#[cfg(test)]
mod tests;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 16;

/// Length of the AES-GCM nonce in bytes (96 bits).
pub const IV_LEN: usize = 12;

/// Length of the AES-GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Length of the key-encryption-key in bytes (128 bits).
pub const KEK_LEN: usize = 16;

/// Length of the cached secret key in bytes (256 bits).
pub const SECRET_KEY_LEN: usize = 32;
