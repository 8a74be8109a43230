use strum::Display;

/// Where a cache is in its lifecycle.
///
/// `Unlocked` is the only state in which a key is resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LockState {
    /// No secret has ever been stored.
    Uninitialized,

    /// A secret exists but its key is not resident.
    Locked,

    Unlocked,
}

/// Broadcast to subscribers after every committed state change.
///
/// Replacing the key of an unlocked cache is reported as another
/// `Unlocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CacheEvent {
    Uninitialized,
    Locked,
    Unlocked,
}

impl From<LockState> for CacheEvent {
    fn from(state: LockState) -> Self {
        match state {
            LockState::Uninitialized => Self::Uninitialized,
            LockState::Locked => Self::Locked,
            LockState::Unlocked => Self::Unlocked,
        }
    }
}
