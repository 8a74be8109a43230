use crate::crypto::PassphraseSecrets;
use crate::crypto::SecretKey;

/// Every kind of secret a cache can hold.
///
/// Only passphrase-derived secrets exist today; new kinds become new
/// variants.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CachedSecrets {
    Passphrase(PassphraseSecrets),
}

impl CachedSecrets {
    pub fn secret_key(&self) -> &SecretKey {
        match self {
            Self::Passphrase(secrets) => secrets.secret_key(),
        }
    }
}

impl From<PassphraseSecrets> for CachedSecrets {
    fn from(secrets: PassphraseSecrets) -> Self {
        Self::Passphrase(secrets)
    }
}
