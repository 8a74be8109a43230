use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::CacheError;
use crate::error::Result;
use crate::store::file_store::write_atomically;

/// Lock timeout used when no settings file exists yet: five minutes.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 300;

/// When an unlocked cache with no attached clients locks itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    /// Lock as soon as the last client detaches.
    Immediate,

    /// Lock this long after the last client detaches.
    After(Duration),

    /// Never lock on a timer; only an explicit lock wipes the secret.
    Never,
}

impl LockTimeout {
    /// Map a persisted seconds value: negative means never, zero means
    /// immediately.
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            s if s < 0 => Self::Never,
            0 => Self::Immediate,
            s => Self::After(Duration::from_secs(s.unsigned_abs())),
        }
    }

    pub fn as_seconds(&self) -> i64 {
        match self {
            Self::Never => -1,
            Self::Immediate => 0,
            Self::After(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX).max(1),
        }
    }
}

impl std::fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediately"),
            Self::After(d) => write!(f, "after {}s", d.as_secs()),
            Self::Never => write!(f, "never"),
        }
    }
}

/// Parameters for PBKDF2 iteration selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfSettings {
    /// Floor for the iteration count of newly written secrets. Stored
    /// secrets below it are re-encrypted on the next unlock.
    pub min_iterations: u32,

    /// Time PBKDF2 on this host and use more iterations if it is fast.
    pub auto_calibrate: bool,

    /// Wall-clock cost calibration aims for.
    pub calibration_target_millis: u64,

    /// Timing samples per calibration round.
    pub calibration_samples: usize,

    /// Calibration rounds before giving up.
    pub max_calibration_rounds: usize,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            min_iterations: 1000,
            auto_calibrate: true,
            calibration_target_millis: 1000,
            calibration_samples: 30,
            max_calibration_rounds: 10,
        }
    }
}

impl KdfSettings {
    pub fn calibration_target(&self) -> Duration {
        Duration::from_millis(self.calibration_target_millis)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |what: &str| Err(CacheError::InvalidConfiguration(format!("{what} must be positive")));

        if self.min_iterations == 0 {
            return invalid("min_iterations");
        }
        if self.calibration_target_millis == 0 {
            return invalid("calibration_target_millis");
        }
        if self.calibration_samples == 0 {
            return invalid("calibration_samples");
        }
        if self.max_calibration_rounds == 0 {
            return invalid("max_calibration_rounds");
        }
        Ok(())
    }
}

/// User-visible cache settings, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// See [`LockTimeout::from_seconds`].
    pub timeout_seconds: i64,

    /// Presentation hints for front-ends; the cache itself ignores them.
    pub vibrate: bool,
    pub show_notification: bool,

    pub kdf: KdfSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            vibrate: true,
            show_notification: true,
            kdf: KdfSettings::default(),
        }
    }
}

impl CacheSettings {
    pub fn lock_timeout(&self) -> LockTimeout {
        LockTimeout::from_seconds(self.timeout_seconds)
    }

    pub fn set_lock_timeout(&mut self, timeout: LockTimeout) {
        self.timeout_seconds = timeout.as_seconds();
    }

    /// Replace these settings with `other`. Returns true if the lock timeout
    /// changed, in which case a running cache needs rescheduling.
    pub fn apply(&mut self, other: &CacheSettings) -> bool {
        let timeout_changed = self.lock_timeout() != other.lock_timeout();
        *self = other.clone();
        timeout_changed
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()
    }

    /// Read settings from `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let settings = match std::fs::read(path) {
            Ok(json) => serde_json::from_slice::<Self>(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no settings at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        write_atomically(path, &json)?;
        Ok(())
    }
}
