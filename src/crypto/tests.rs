//! Pipeline tests for passphrase-protected secrets
//!
//! Covers passphrase → KEK → wrap → bytes → store and back, including the
//! migration of legacy blobs.

use tempfile::TempDir;

use super::format::FORMAT_VERSION_CURRENT;
use super::format::LEGACY_KDF_ITERATIONS;
use super::*;
use crate::config::settings::KdfSettings;
use crate::error::CacheError;
use crate::store::FileSecretStore;
use crate::store::MemorySecretStore;
use crate::store::SecretStore;

/// A v0 blob written by an early release, wrapping [`LEGACY_KEY`] under the
/// passphrase "purplepipers" with 100 iterations.
const LEGACY_BLOB: [u8; 80] = [
    0x00, 0x00, 0x00, 0x00, 0x11, 0x84, 0x80, 0x15, 0xbc, 0x01, 0x35, 0x8b, 0x7a, 0x44, 0x6d, 0xbb,
    0x53, 0x83, 0x69, 0x0b, 0x30, 0x5d, 0x9d, 0x93, 0xaf, 0x48, 0x5f, 0xce, 0x5f, 0x6b, 0x4b, 0x3f,
    0xa4, 0x44, 0x00, 0x3c, 0x7e, 0xee, 0x69, 0x8c, 0xa5, 0xcf, 0x68, 0xa7, 0x13, 0xd7, 0xcc, 0xd2,
    0xef, 0x13, 0xca, 0x57, 0x8c, 0xf8, 0x0c, 0x6e, 0x56, 0xe3, 0xdc, 0x15, 0xe9, 0xb3, 0xda, 0x19,
    0x37, 0x4f, 0xec, 0x2a, 0x37, 0xb2, 0xb3, 0xe6, 0x10, 0xf3, 0xdc, 0x00, 0x04, 0xc4, 0x08, 0xc6,
];

const LEGACY_KEY: [u8; SECRET_KEY_LEN] = [
    0x91, 0x8e, 0x8e, 0x3b, 0xac, 0x1b, 0x2d, 0x37, 0x68, 0x66, 0x9e, 0x22, 0x1c, 0xbc, 0x27, 0x5e,
    0xdc, 0x51, 0x8d, 0x0c, 0x9a, 0x75, 0x72, 0x97, 0xf5, 0x06, 0x09, 0x3c, 0x19, 0xae, 0x72, 0x59,
];

/// Fixed iteration floor, no calibration.
fn fast_kdf() -> KdfSettings {
    KdfSettings {
        min_iterations: 1000,
        auto_calibrate: false,
        ..KdfSettings::default()
    }
}

fn passphrase(s: &str) -> Passphrase {
    Passphrase::try_from(s).unwrap()
}

#[test]
fn test_full_encryption_pipeline() {
    let kdf = fast_kdf();

    let (secrets, serialized) = PassphraseSecrets::initialize(passphrase("hunter2"), &kdf).unwrap();
    assert_eq!(FORMAT_VERSION_CURRENT, serialized.format_version);
    assert_eq!(1000, serialized.kdf_iterations);

    let blob = serialized.to_bytes();
    let fetched = PassphraseSecrets::fetch(passphrase("hunter2"), &blob, &kdf).unwrap();

    assert_eq!(secrets, fetched.secrets);
    assert!(fetched.upgraded.is_none());
}

#[test]
fn test_initialize_generates_distinct_keys_and_salts() {
    let kdf = fast_kdf();

    let (a, sa) = PassphraseSecrets::initialize(passphrase("same"), &kdf).unwrap();
    let (b, sb) = PassphraseSecrets::initialize(passphrase("same"), &kdf).unwrap();

    assert_ne!(a.secret_key(), b.secret_key());
    assert_ne!(sa.salt, sb.salt);
    assert_ne!(sa.iv, sb.iv);
}

#[test]
fn test_wrong_passphrase_is_authentication_failure() {
    let kdf = fast_kdf();
    let (_, serialized) = PassphraseSecrets::initialize(passphrase("right"), &kdf).unwrap();

    let result = PassphraseSecrets::fetch(passphrase("wrong"), &serialized.to_bytes(), &kdf);
    assert!(matches!(result, Err(CacheError::AuthenticationFailure)));
}

#[test]
fn test_tampering_is_authentication_failure() {
    let kdf = fast_kdf();
    let (_, serialized) = PassphraseSecrets::initialize(passphrase("right"), &kdf).unwrap();
    let blob = serialized.to_bytes();

    // salt, iv, ciphertext body and tag
    for index in [8, 8 + SALT_LEN, 8 + SALT_LEN + IV_LEN, blob.len() - 1] {
        let mut tampered = blob.clone();
        tampered[index] ^= 0x01;

        let result = PassphraseSecrets::fetch(passphrase("right"), &tampered, &kdf);
        assert!(
            matches!(result, Err(CacheError::AuthenticationFailure)),
            "byte {index}"
        );
    }
}

#[test]
fn test_wrong_payload_length_is_malformed() {
    let p = passphrase("short");
    let salt = KeyEncryptionKey::generate_salt();
    let kek = KeyEncryptionKey::derive(&p, &salt, 1000).unwrap();
    let iv = KeyCipher::generate_nonce();
    let ciphertext = KeyCipher::new(&kek).unwrap().encrypt(&[1u8; 31], &iv).unwrap();
    let blob = SerializedSecret::new(1000, salt, iv, ciphertext).to_bytes();

    let result = PassphraseSecrets::fetch(p, &blob, &fast_kdf());
    assert!(matches!(result, Err(CacheError::MalformedSecret(_))));
}

#[test]
fn test_legacy_blob_decrypts_and_upgrades() {
    let kdf = fast_kdf();

    let fetched = PassphraseSecrets::fetch(passphrase("purplepipers"), &LEGACY_BLOB, &kdf).unwrap();
    assert_eq!(&LEGACY_KEY, fetched.secrets.secret_key().as_bytes());

    let upgraded = fetched.upgraded.expect("legacy blob must be upgraded");
    assert_eq!(FORMAT_VERSION_CURRENT, upgraded.format_version);
    assert!(upgraded.kdf_iterations >= kdf.min_iterations);
    assert!(upgraded.kdf_iterations > LEGACY_KDF_ITERATIONS);

    let refetched =
        PassphraseSecrets::fetch(passphrase("purplepipers"), &upgraded.to_bytes(), &kdf).unwrap();
    assert_eq!(&LEGACY_KEY, refetched.secrets.secret_key().as_bytes());
    assert!(refetched.upgraded.is_none());
}

#[test]
fn test_legacy_blob_wrong_passphrase() {
    let result = PassphraseSecrets::fetch(passphrase("purplepiper"), &LEGACY_BLOB, &fast_kdf());
    assert!(matches!(result, Err(CacheError::AuthenticationFailure)));
}

#[test]
fn test_weak_current_blob_is_upgraded() {
    let weak = KdfSettings {
        min_iterations: 200,
        ..fast_kdf()
    };
    let (secrets, serialized) = PassphraseSecrets::initialize(passphrase("pw"), &weak).unwrap();
    assert_eq!(200, serialized.kdf_iterations);

    let fetched = PassphraseSecrets::fetch(passphrase("pw"), &serialized.to_bytes(), &fast_kdf()).unwrap();
    assert_eq!(secrets, fetched.secrets);
    assert_eq!(1000, fetched.upgraded.unwrap().kdf_iterations);
}

#[test]
fn test_change_passphrase_keeps_key() {
    let kdf = fast_kdf();
    let (secrets, _) = PassphraseSecrets::initialize(passphrase("old"), &kdf).unwrap();

    let rewrapped = secrets.change_passphrase(passphrase("new"), &kdf).unwrap();
    let blob = rewrapped.to_bytes();

    assert!(matches!(
        PassphraseSecrets::fetch(passphrase("old"), &blob, &kdf),
        Err(CacheError::AuthenticationFailure)
    ));
    let fetched = PassphraseSecrets::fetch(passphrase("new"), &blob, &kdf).unwrap();
    assert_eq!(secrets, fetched.secrets);
}

#[test]
fn test_invalid_kdf_settings_rejected() {
    let kdf = KdfSettings {
        min_iterations: 0,
        ..fast_kdf()
    };
    assert!(matches!(
        PassphraseSecrets::initialize(passphrase("pw"), &kdf),
        Err(CacheError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_store_initialize_only_once() {
    let store = MemorySecretStore::new();
    let kdf = fast_kdf();

    PassphraseSecrets::initialize_and_save(&store, passphrase("pw"), &kdf).unwrap();
    assert!(store.is_initialized().unwrap());

    assert!(matches!(
        PassphraseSecrets::initialize_and_save(&store, passphrase("pw"), &kdf),
        Err(CacheError::AlreadyInitialized)
    ));
    assert_eq!(1, store.save_count().unwrap());
}

#[test]
fn test_fetch_from_empty_store() {
    let store = MemorySecretStore::new();
    assert!(matches!(
        PassphraseSecrets::fetch_from_store(&store, passphrase("pw"), &fast_kdf()),
        Err(CacheError::NotInitialized)
    ));
}

#[test]
fn test_failed_unlock_never_writes() {
    let store = MemorySecretStore::with_blob(LEGACY_BLOB.to_vec());

    let result = PassphraseSecrets::fetch_from_store(&store, passphrase("nope"), &fast_kdf());
    assert!(matches!(result, Err(CacheError::AuthenticationFailure)));
    assert_eq!(0, store.save_count().unwrap());
    assert_eq!(Some(LEGACY_BLOB.to_vec()), store.load().unwrap());
}

#[test]
fn test_legacy_store_migrates_on_unlock() {
    let store = MemorySecretStore::with_blob(LEGACY_BLOB.to_vec());
    let kdf = fast_kdf();

    let secrets = PassphraseSecrets::fetch_from_store(&store, passphrase("purplepipers"), &kdf).unwrap();
    assert_eq!(&LEGACY_KEY, secrets.secret_key().as_bytes());
    assert_eq!(1, store.save_count().unwrap());

    let stored = SerializedSecret::parse(&store.load().unwrap().unwrap()).unwrap();
    assert!(!stored.is_legacy());
    assert!(stored.kdf_iterations >= kdf.min_iterations);

    // second unlock has nothing to migrate
    PassphraseSecrets::fetch_from_store(&store, passphrase("purplepipers"), &kdf).unwrap();
    assert_eq!(1, store.save_count().unwrap());
}

#[test]
fn test_file_store_roundtrip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = FileSecretStore::open(temp_dir.path()).unwrap();
    let kdf = fast_kdf();

    let created = PassphraseSecrets::initialize_and_save(&store, passphrase("FileIOTest456!"), &kdf).unwrap();

    let reopened = FileSecretStore::open(temp_dir.path()).unwrap();
    let loaded = PassphraseSecrets::fetch_from_store(&reopened, passphrase("FileIOTest456!"), &kdf).unwrap();
    assert_eq!(created, loaded);

    loaded
        .change_passphrase_and_save(&reopened, passphrase("Changed789?"), &kdf)
        .unwrap();
    let reloaded = PassphraseSecrets::fetch_from_store(&store, passphrase("Changed789?"), &kdf).unwrap();
    assert_eq!(created, reloaded);
}

#[test]
fn test_calibrated_iterations_respect_floor() {
    let kdf = KdfSettings {
        min_iterations: 1500,
        auto_calibrate: true,
        calibration_target_millis: 1,
        calibration_samples: 5,
        ..KdfSettings::default()
    };

    let (_, serialized) = PassphraseSecrets::initialize(passphrase("pw"), &kdf).unwrap();
    assert!(serialized.kdf_iterations >= 1500);
}

mod wipe_audit {
    use super::*;
    use crate::wipe::audit;

    const KEK: &str = "key-encryption-key";
    const DECRYPTED: &str = "decrypted key";
    const PASSPHRASE: &str = "passphrase";

    fn malformed_payload_blob() -> Vec<u8> {
        let p = passphrase("short");
        let salt = KeyEncryptionKey::generate_salt();
        let kek = KeyEncryptionKey::derive(&p, &salt, 1000).unwrap();
        let iv = KeyCipher::generate_nonce();
        let ciphertext = KeyCipher::new(&kek).unwrap().encrypt(&[1u8; 31], &iv).unwrap();
        SerializedSecret::new(1000, salt, iv, ciphertext).to_bytes()
    }

    #[test]
    fn test_initialize_and_fetch_wipe_every_intermediate() {
        let kdf = fast_kdf();
        audit::take();

        let (secrets, serialized) = PassphraseSecrets::initialize(passphrase("pw"), &kdf).unwrap();
        let fetched = PassphraseSecrets::fetch(passphrase("pw"), &serialized.to_bytes(), &kdf).unwrap();
        assert_eq!(secrets, fetched.secrets);
        assert!(fetched.upgraded.is_none());

        let tallies = audit::take_all_wiped();
        assert_eq!(2, audit::created_count(&tallies, PASSPHRASE));
        assert_eq!(2, audit::created_count(&tallies, KEK));
        assert_eq!(1, audit::created_count(&tallies, DECRYPTED));
    }

    #[test]
    fn test_wrong_passphrase_wipes_kek_and_passphrase() {
        let kdf = fast_kdf();
        let (_, serialized) = PassphraseSecrets::initialize(passphrase("right"), &kdf).unwrap();
        audit::take();

        let result = PassphraseSecrets::fetch(passphrase("wrong"), &serialized.to_bytes(), &kdf);
        assert!(matches!(result, Err(CacheError::AuthenticationFailure)));

        let tallies = audit::take_all_wiped();
        assert_eq!(1, audit::created_count(&tallies, PASSPHRASE));
        assert_eq!(1, audit::created_count(&tallies, KEK));
        assert_eq!(0, audit::created_count(&tallies, DECRYPTED));
    }

    #[test]
    fn test_malformed_payload_is_wiped_before_returning() {
        let blob = malformed_payload_blob();
        audit::take();

        let result = PassphraseSecrets::fetch(passphrase("short"), &blob, &fast_kdf());
        assert!(matches!(result, Err(CacheError::MalformedSecret(_))));

        let tallies = audit::take_all_wiped();
        assert_eq!(1, audit::created_count(&tallies, DECRYPTED));
        assert_eq!(1, audit::created_count(&tallies, KEK));
    }

    #[test]
    fn test_unparseable_blob_wipes_passphrase() {
        audit::take();

        let result = PassphraseSecrets::fetch(passphrase("pw"), &[0, 0, 0, 7, 1, 2, 3], &fast_kdf());
        assert!(matches!(result, Err(CacheError::UnsupportedFormatVersion(7))));

        let tallies = audit::take_all_wiped();
        assert_eq!(1, audit::created_count(&tallies, PASSPHRASE));
        assert_eq!(0, audit::created_count(&tallies, KEK));
    }

    #[test]
    fn test_legacy_upgrade_wipes_both_keks() {
        audit::take();

        let fetched = PassphraseSecrets::fetch(passphrase("purplepipers"), &LEGACY_BLOB, &fast_kdf()).unwrap();
        assert!(fetched.upgraded.is_some());

        let tallies = audit::take_all_wiped();
        assert_eq!(2, audit::created_count(&tallies, KEK));
        assert_eq!(1, audit::created_count(&tallies, DECRYPTED));
        assert_eq!(1, audit::created_count(&tallies, PASSPHRASE));
    }

    #[test]
    fn test_change_passphrase_wipes_new_passphrase() {
        let kdf = fast_kdf();
        let (secrets, _) = PassphraseSecrets::initialize(passphrase("old"), &kdf).unwrap();
        audit::take();

        secrets.change_passphrase(passphrase("new"), &kdf).unwrap();

        let tallies = audit::take_all_wiped();
        assert_eq!(1, audit::created_count(&tallies, PASSPHRASE));
        assert_eq!(1, audit::created_count(&tallies, KEK));
    }
}
