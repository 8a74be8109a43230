use std::path::PathBuf;

use clap::builder::RangedI64ValueParser;
use clap::Parser;
use clap::Subcommand;

use super::settings::CacheSettings;

/// Command-line arguments of the `cacheword` binary
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// Directory holding settings and the wrapped secret. Defaults to the
    /// platform's data directory.
    #[clap(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Override the lock timeout. Negative never locks on a timer, 0 locks
    /// as soon as the last client detaches.
    #[clap(long, allow_hyphen_values = true)]
    pub timeout_seconds: Option<i64>,

    /// Override the minimum PBKDF2 iteration count for newly written secrets.
    #[clap(long, value_parser(RangedI64ValueParser::<u32>::new().range(1..=i64::from(u32::MAX))))]
    pub min_iterations: Option<u32>,

    /// Use `--min-iterations` as is instead of calibrating to this host.
    #[clap(long)]
    pub no_calibrate: bool,

    /// Wall-clock time calibration aims for, in milliseconds.
    #[clap(long, value_parser(RangedI64ValueParser::<u64>::new().range(1..)))]
    pub calibration_target_millis: Option<u64>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a new secret protected by a passphrase.
    Init,

    /// Unlock the secret with its passphrase.
    Unlock {
        /// Keep the cache unlocked and attached until Ctrl-C, then detach
        /// and let the lock timeout run.
        #[clap(long)]
        hold: bool,
    },

    /// Re-wrap the secret under a new passphrase.
    ChangePassphrase,

    /// Print whether a secret exists and the stored KDF parameters.
    Status,

    /// Measure PBKDF2 on this host and print the chosen iteration count.
    Calibrate {
        #[clap(long, value_parser(RangedI64ValueParser::<u64>::new().range(0..)))]
        target_millis: Option<u64>,

        #[clap(long, value_parser(RangedI64ValueParser::<usize>::new().range(1..)))]
        samples: Option<usize>,
    },

    /// Print the effective settings as JSON.
    Settings {
        /// Persist the effective settings, including command-line overrides.
        #[clap(long)]
        save: bool,
    },
}

impl Args {
    /// Overlay command-line overrides on settings read from disk.
    pub fn apply_overrides(&self, settings: &mut CacheSettings) {
        if let Some(timeout_seconds) = self.timeout_seconds {
            settings.timeout_seconds = timeout_seconds;
        }
        if let Some(min_iterations) = self.min_iterations {
            settings.kdf.min_iterations = min_iterations;
        }
        if self.no_calibrate {
            settings.kdf.auto_calibrate = false;
        }
        if let Some(millis) = self.calibration_target_millis {
            settings.kdf.calibration_target_millis = millis;
        }
    }
}
