//! Passphrase input for the command-line front-end
//!
//! Handles interactive prompts with confirmation and environment variable
//! fallback.

use anyhow::anyhow;
use anyhow::Result;
use rpassword::prompt_password;
use zeroize::Zeroizing;

use crate::crypto::Passphrase;

/// Read by [`PassphrasePrompt`] before falling back to a terminal prompt.
pub const PASSPHRASE_ENV_VAR: &str = "CACHEWORD_PASSPHRASE";

/// Read by [`PassphrasePrompt::new_passphrase_or_env`] when changing the
/// passphrase non-interactively.
pub const NEW_PASSPHRASE_ENV_VAR: &str = "CACHEWORD_NEW_PASSPHRASE";

/// Manages passphrase input
#[derive(Debug, Clone, Copy)]
pub struct PassphrasePrompt;

impl PassphrasePrompt {
    /// Prompt for a new passphrase until it is non-empty and confirmed.
    pub fn prompt_new_passphrase() -> Result<Passphrase> {
        println!("\nChoosing a passphrase for the secret cache");
        println!("If you lose this passphrase, the cached secret is lost with it.\n");

        loop {
            let passphrase = Zeroizing::new(prompt_password("Enter new passphrase: ")?);
            if passphrase.is_empty() {
                eprintln!("Passphrase cannot be empty. Please try again.\n");
                continue;
            }

            let confirm = Zeroizing::new(prompt_password("Confirm new passphrase: ")?);
            if *passphrase != *confirm {
                eprintln!("Passphrases do not match. Please try again.\n");
                continue;
            }

            return Ok(Passphrase::try_from(passphrase)?);
        }
    }

    /// Prompt once for an existing passphrase
    pub fn prompt_existing_passphrase(label: &str) -> Result<Passphrase> {
        let passphrase = Zeroizing::new(prompt_password(format!("{label}: "))?);
        if passphrase.is_empty() {
            return Err(anyhow!("Passphrase cannot be empty"));
        }
        Ok(Passphrase::try_from(passphrase)?)
    }

    /// Get passphrase from environment variable (for automation/testing)
    ///
    /// Environment variables are visible to other processes of the same
    /// user; only use this in CI or similar.
    pub fn from_env_var(var_name: &str) -> Result<Passphrase> {
        let value = Zeroizing::new(std::env::var(var_name).map_err(|_| {
            anyhow!(
                "Environment variable {} not set. Use interactive prompt instead.",
                var_name
            )
        })?);
        Ok(Passphrase::try_from(value)?)
    }

    /// The existing passphrase from [`PASSPHRASE_ENV_VAR`], or a prompt.
    pub fn existing_passphrase_or_env() -> Result<Passphrase> {
        match Self::from_env_var(PASSPHRASE_ENV_VAR) {
            Ok(passphrase) => Ok(passphrase),
            Err(_) => Self::prompt_existing_passphrase("Enter passphrase"),
        }
    }

    /// A new passphrase from `var_name`, or a confirmed prompt.
    pub fn new_passphrase_or_env(var_name: &str) -> Result<Passphrase> {
        match Self::from_env_var(var_name) {
            Ok(passphrase) => Ok(passphrase),
            Err(_) => Self::prompt_new_passphrase(),
        }
    }
}
