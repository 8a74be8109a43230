//! A passphrase-protected secret cache.
//!
//! A 32-byte secret key is generated once, wrapped with AES-GCM under a key
//! derived from a passphrase with PBKDF2, and stored. Unlocking derives the
//! key-encryption key again and keeps the unwrapped secret in memory until
//! it is locked manually, the lock timeout elapses with no attached
//! subscribers, or the cache is shut down.
//!
//! The crate is organized as follows:
//! - [`crypto`]: key derivation, iteration calibration, wrapping and the
//!   versioned on-disk format.
//! - [`store`]: persistence of the wrapped secret and the initialized flag.
//! - [`cache`]: the shared in-memory cache with its lock timer and events.
//! - [`attach`]: client sessions that bind to the cache and receive its
//!   lock state changes.
//! - [`config`]: settings file, data directory and command-line arguments.

pub mod attach;
pub mod cache;
mod commands;
pub mod config;
pub mod crypto;
pub mod error;
pub mod prompt;
pub mod store;
pub mod wipe;

use config::cli_args::Args;

/// Run the subcommand selected by `args`.
pub async fn run(args: Args) -> anyhow::Result<()> {
    commands::run(args).await
}
