//! The in-memory secret cache and its lock/timeout state machine.
//!
//! ```text
//! Uninitialized --initialize--> Unlocked <--set_secret/lock--> Locked
//! ```
//!
//! The cache never touches storage; unwrapping and persisting secrets is
//! done by [`crate::crypto`] and [`crate::store`], usually via
//! [`crate::attach::CacheWordHandle`].

mod secret_cache;
mod secrets;
mod state;

pub use secret_cache::SecretCache;
pub use secrets::CachedSecrets;
pub use state::CacheEvent;
pub use state::LockState;

pub use crate::config::settings::LockTimeout;
