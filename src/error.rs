//! provides the error type shared by the cache, the crypto engine and the
//! attachment protocol.

/// enumerates possible cache errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// AEAD tag mismatch. Either the passphrase is wrong or the stored blob
    /// was corrupted or tampered with; the two cases are indistinguishable.
    #[error("authentication failed (wrong passphrase or corrupted secret)")]
    AuthenticationFailure,

    #[error("no secret has been initialized")]
    NotInitialized,

    #[error("a secret has already been initialized")]
    AlreadyInitialized,

    #[error("client is not attached to the secret cache")]
    NotConnected,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("kdf calibration produced no positive cost estimate after {rounds} rounds")]
    CalibrationDivergence { rounds: usize },

    #[error("malformed serialized secret: {0}")]
    MalformedSecret(String),

    #[error("unsupported serialized secret format version: {0}")]
    UnsupportedFormatVersion(u32),

    #[error("input is not valid utf-8")]
    InvalidUtf8,

    /// `detach()` was called more often than `attach()`. This is a bug in the
    /// caller's bookkeeping, never a runtime condition.
    #[error("detach() called without a matching attach()")]
    UnbalancedDetach,

    #[error("secret storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("background kdf task failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Worker(e.to_string())
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
