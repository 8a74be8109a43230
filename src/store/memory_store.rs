use std::io;
use std::sync::Mutex;
use std::sync::MutexGuard;

use super::SecretStore;
use crate::error::Result;

#[derive(Debug, Default)]
struct MemoryState {
    blob: Option<Vec<u8>>,
    initialized: bool,
    saves: usize,
}

/// In-process store, for tests and for callers that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    state: Mutex<MemoryState>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `blob` and is marked initialized.
    pub fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                blob: Some(blob),
                initialized: true,
                saves: 0,
            }),
        }
    }

    /// Number of successful [`SecretStore::save`] calls.
    pub fn save_count(&self) -> Result<usize> {
        Ok(self.lock()?.saves)
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("memory secret store lock poisoned"))
    }
}

impl SecretStore for MemorySecretStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.blob.clone())
    }

    fn save(&self, blob: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        state.blob = Some(blob.to_vec());
        state.saves += 1;
        Ok(())
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(self.lock()?.initialized)
    }

    fn set_initialized(&self, initialized: bool) -> Result<()> {
        self.lock()?.initialized = initialized;
        Ok(())
    }
}
