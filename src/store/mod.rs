//! Persistence of the wrapped secret and the "initialized" flag.
//!
//! Stores only ever see ciphertext; nothing written through this trait is
//! secret on its own.

pub(crate) mod file_store;
mod memory_store;

pub use file_store::FileSecretStore;
pub use memory_store::MemorySecretStore;

use crate::error::Result;

/// File name of the serialized, passphrase-wrapped secret.
pub const SECRETS_FILE_NAME: &str = "encrypted_secrets";

/// File name of the initialized marker.
pub const INITIALIZED_FILE_NAME: &str = "initialized";

/// Backing storage for one wrapped secret.
///
/// Implementations must make [`SecretStore::save`] atomic: a reader sees the
/// old blob or the new one, never a mix.
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// The stored blob, or `None` if nothing was ever saved.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    fn save(&self, blob: &[u8]) -> Result<()>;

    fn is_initialized(&self) -> Result<bool>;

    fn set_initialized(&self, initialized: bool) -> Result<()>;
}
