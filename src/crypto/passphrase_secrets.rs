use rand::Rng;
use tracing::debug;
use tracing::info;
use tracing::warn;
use zeroize::Zeroizing;

use super::calibrator::iterations_for_new_secret;
use super::KeyCipher;
use super::KeyEncryptionKey;
use super::Passphrase;
use super::SerializedSecret;
use super::SECRET_KEY_LEN;
use crate::config::settings::KdfSettings;
use crate::error::CacheError;
use crate::error::Result;
use crate::store::SecretStore;
use crate::wipe;

const DECRYPTED_LABEL: &str = "decrypted key";

/// The cached 256-bit key. Wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Zeroizing<[u8; SECRET_KEY_LEN]>);

impl SecretKey {
    /// A fresh key from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        rand::rng().fill(&mut key[..]);
        Self(key)
    }

    /// Copy a decrypted payload into a key. Anything but exactly
    /// [`SECRET_KEY_LEN`] bytes is [`CacheError::MalformedSecret`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(CacheError::MalformedSecret(format!(
                "decrypted key is {} bytes, expected {}",
                bytes.len(),
                SECRET_KEY_LEN
            )));
        }
        let mut key = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Secrets protected by a user passphrase: a random key wrapped under a
/// PBKDF2-derived KEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassphraseSecrets {
    secret_key: SecretKey,
}

/// Result of unwrapping a stored secret.
#[derive(Debug)]
pub struct FetchedSecrets {
    pub secrets: PassphraseSecrets,

    /// Re-encrypted form to persist, present when the stored form was a
    /// legacy layout or used fewer iterations than currently required.
    pub upgraded: Option<SerializedSecret>,
}

impl PassphraseSecrets {
    /// Secrets around an already known key, e.g. one unwrapped elsewhere.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        Self { secret_key }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Generate a new key and wrap it under `passphrase`.
    ///
    /// The passphrase is consumed and wiped whether or not this succeeds.
    pub fn initialize(passphrase: Passphrase, kdf: &KdfSettings) -> Result<(Self, SerializedSecret)> {
        let secrets = Self {
            secret_key: SecretKey::generate(),
        };
        let iterations = iterations_for_new_secret(kdf)?;
        let serialized = wrap_key(&passphrase, secrets.secret_key.as_bytes(), iterations)?;

        info!("initialized new secret ({} kdf iterations)", iterations);
        Ok((secrets, serialized))
    }

    /// Unwrap a serialized secret with `passphrase`.
    ///
    /// A wrong passphrase and a tampered blob both yield
    /// [`CacheError::AuthenticationFailure`].
    pub fn fetch(passphrase: Passphrase, serialized: &[u8], kdf: &KdfSettings) -> Result<FetchedSecrets> {
        let stored = SerializedSecret::parse(serialized)?;

        let mut plaintext = unwrap_key(&passphrase, &stored)?;
        let secret_key = SecretKey::from_slice(&plaintext);
        wipe::wipe_tracked(DECRYPTED_LABEL, &mut plaintext[..]);
        let secrets = Self {
            secret_key: secret_key?,
        };

        let upgraded = if stored.needs_upgrade(kdf.min_iterations) {
            match iterations_for_new_secret(kdf)
                .and_then(|iterations| wrap_key(&passphrase, secrets.secret_key.as_bytes(), iterations))
            {
                Ok(serialized) => {
                    info!(
                        "upgrading stored secret from v{} / {} iterations to v{} / {} iterations",
                        stored.format_version,
                        stored.kdf_iterations,
                        serialized.format_version,
                        serialized.kdf_iterations
                    );
                    Some(serialized)
                }
                Err(e) => {
                    warn!("could not re-encrypt weak stored secret, keeping it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(FetchedSecrets { secrets, upgraded })
    }

    /// Wrap the same key under `new_passphrase` with a fresh salt, IV and
    /// iteration count.
    pub fn change_passphrase(&self, new_passphrase: Passphrase, kdf: &KdfSettings) -> Result<SerializedSecret> {
        let iterations = iterations_for_new_secret(kdf)?;
        wrap_key(&new_passphrase, self.secret_key.as_bytes(), iterations)
    }

    /// [`Self::initialize`] and persist the result.
    ///
    /// Refuses to overwrite a store that is already initialized.
    pub fn initialize_and_save(store: &dyn SecretStore, passphrase: Passphrase, kdf: &KdfSettings) -> Result<Self> {
        if store.is_initialized()? {
            return Err(CacheError::AlreadyInitialized);
        }

        let (secrets, serialized) = Self::initialize(passphrase, kdf)?;
        store.save(&serialized.to_bytes())?;
        store.set_initialized(true)?;

        Ok(secrets)
    }

    /// [`Self::fetch`] from `store`, persisting an upgraded blob if one was
    /// produced. A failed unlock never writes to the store.
    pub fn fetch_from_store(store: &dyn SecretStore, passphrase: Passphrase, kdf: &KdfSettings) -> Result<Self> {
        if !store.is_initialized()? {
            return Err(CacheError::NotInitialized);
        }
        let blob = store.load()?.ok_or(CacheError::NotInitialized)?;

        let FetchedSecrets { secrets, upgraded } = Self::fetch(passphrase, &blob, kdf)?;

        if let Some(serialized) = upgraded {
            match store.save(&serialized.to_bytes()) {
                Ok(()) => debug!("persisted upgraded secret"),
                Err(e) => warn!("failed to persist upgraded secret: {}", e),
            }
        }

        Ok(secrets)
    }

    /// [`Self::change_passphrase`] and persist the result.
    pub fn change_passphrase_and_save(
        &self,
        store: &dyn SecretStore,
        new_passphrase: Passphrase,
        kdf: &KdfSettings,
    ) -> Result<()> {
        if !store.is_initialized()? {
            return Err(CacheError::NotInitialized);
        }

        let serialized = self.change_passphrase(new_passphrase, kdf)?;
        store.save(&serialized.to_bytes())?;

        info!("passphrase changed");
        Ok(())
    }
}

fn wrap_key(passphrase: &Passphrase, plaintext: &[u8], iterations: u32) -> Result<SerializedSecret> {
    let salt = KeyEncryptionKey::generate_salt();
    let kek = KeyEncryptionKey::derive(passphrase, &salt, iterations)?;
    let cipher = KeyCipher::new(&kek)?;

    let iv = KeyCipher::generate_nonce();
    let ciphertext = cipher.encrypt(plaintext, &iv)?;

    Ok(SerializedSecret::new(iterations, salt, iv, ciphertext))
}

fn unwrap_key(passphrase: &Passphrase, stored: &SerializedSecret) -> Result<Zeroizing<Vec<u8>>> {
    let kek = KeyEncryptionKey::derive(passphrase, &stored.salt, stored.kdf_iterations)?;
    let cipher = KeyCipher::new(&kek)?;
    let plaintext = cipher.decrypt(&stored.ciphertext, &stored.iv)?;
    wipe::track_created(DECRYPTED_LABEL);
    Ok(plaintext)
}
