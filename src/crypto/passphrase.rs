use zeroize::Zeroizing;

use crate::error::CacheError;
use crate::error::Result;
use crate::wipe;

/// A user passphrase, held as UTF-8 in a buffer that is wiped on drop.
///
/// Engine entry points take a `Passphrase` by value so that it is dropped,
/// and therefore wiped, on every exit path including errors.
pub struct Passphrase {
    utf8: Zeroizing<Vec<u8>>,
}

impl Passphrase {
    /// Build a passphrase from a char buffer and wipe that buffer.
    ///
    /// The input is wiped even if the passphrase is rejected.
    pub fn from_chars(chars: &mut [char]) -> Result<Self> {
        let utf8 = wipe::chars_to_utf8_bytes(chars);
        wipe::wipe(chars);
        Self::validated(utf8)
    }

    /// Take ownership of an already encoded passphrase.
    pub fn from_utf8(utf8: Zeroizing<Vec<u8>>) -> Result<Self> {
        if std::str::from_utf8(&utf8).is_err() {
            return Err(CacheError::InvalidUtf8);
        }
        Self::validated(utf8)
    }

    /// The passphrase bytes handed to the KDF.
    pub fn as_bytes(&self) -> &[u8] {
        &self.utf8
    }

    pub fn len(&self) -> usize {
        self.utf8.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utf8.is_empty()
    }

    fn validated(utf8: Zeroizing<Vec<u8>>) -> Result<Self> {
        if utf8.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "passphrase must not be empty".to_string(),
            ));
        }
        wipe::track_created(TRACKING_LABEL);
        Ok(Self { utf8 })
    }
}

const TRACKING_LABEL: &str = "passphrase";

impl Clone for Passphrase {
    fn clone(&self) -> Self {
        let mut utf8 = Zeroizing::new(Vec::with_capacity(self.utf8.len()));
        utf8.extend_from_slice(&self.utf8);
        wipe::track_created(TRACKING_LABEL);
        Self { utf8 }
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        wipe::wipe_tracked(TRACKING_LABEL, &mut self.utf8[..]);
    }
}

impl TryFrom<Zeroizing<String>> for Passphrase {
    type Error = CacheError;

    /// Reuses the string's allocation, so no unwiped copy is left behind.
    fn try_from(mut s: Zeroizing<String>) -> Result<Self> {
        let utf8 = Zeroizing::new(std::mem::take(&mut *s).into_bytes());
        Self::validated(utf8)
    }
}

impl TryFrom<&str> for Passphrase {
    type Error = CacheError;

    fn try_from(s: &str) -> Result<Self> {
        let mut utf8 = Zeroizing::new(Vec::with_capacity(s.len()));
        utf8.extend_from_slice(s.as_bytes());
        Self::validated(utf8)
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}
