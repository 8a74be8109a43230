use std::sync::Arc;
use std::sync::Weak;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::Instrument;

use super::CacheEvent;
use super::CachedSecrets;
use super::LockState;
use super::LockTimeout;
use crate::config::settings::CacheSettings;
use crate::error::CacheError;
use crate::error::Result;

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Holds a decrypted secret in memory and wipes it on lock.
///
/// The cache locks itself when the configured [`LockTimeout`] elapses with
/// no clients attached. Clones share the same state; construct one per
/// application and hand clones to whoever needs it.
///
/// All mutation happens under one async mutex, so concurrent calls from
/// several tasks observe a strict total order.
#[derive(Debug, Clone)]
pub struct SecretCache {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,

    /// Held by a session across a store write and the cache transition that
    /// follows it. Always taken before `state`, never while holding it.
    transitions: Mutex<()>,
}

#[derive(Debug)]
struct CacheState {
    secrets: Option<CachedSecrets>,
    initialized: bool,
    subscribers: usize,
    timeout: LockTimeout,
    timer: Option<PendingTimeout>,

    /// Bumped every time a timer is armed, so a timer that lost a race with
    /// its own cancellation can tell it is stale.
    generation: u64,
}

#[derive(Debug)]
struct PendingTimeout {
    generation: u64,
    handle: JoinHandle<()>,
}

impl CacheState {
    fn lock_state(&self) -> LockState {
        match (&self.secrets, self.initialized) {
            (Some(_), _) => LockState::Unlocked,
            (None, true) => LockState::Locked,
            (None, false) => LockState::Uninitialized,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(pending) = self.timer.take() {
            pending.handle.abort();
        }
    }
}

impl Drop for CacheState {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

impl SecretCache {
    /// A locked cache, or an uninitialized one if no secret was ever stored.
    pub fn new(timeout: LockTimeout, initialized: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = CacheState {
            secrets: None,
            initialized,
            subscribers: 0,
            timeout,
            timer: None,
            generation: 0,
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                events,
                transitions: Mutex::new(()),
            }),
        }
    }

    /// Receive every [`CacheEvent`] emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub async fn state(&self) -> LockState {
        self.lock_guard().await.lock_state()
    }

    /// True unless a key is resident. An uninitialized cache is locked.
    pub async fn is_locked(&self) -> bool {
        self.state().await != LockState::Unlocked
    }

    pub async fn is_initialized(&self) -> bool {
        self.lock_guard().await.initialized
    }

    /// A copy of the resident secrets, if unlocked.
    ///
    /// The copy wipes itself on drop; callers should drop it as soon as the
    /// operation needing it is done rather than hold on to it.
    pub async fn get_secret(&self) -> Option<CachedSecrets> {
        self.lock_guard().await.secrets.clone()
    }

    /// Run `f` against the resident secrets without copying them.
    ///
    /// `f` runs inside the cache's critical section and must not call back
    /// into the cache.
    pub async fn with_secret<R>(&self, f: impl FnOnce(&CachedSecrets) -> R) -> Option<R> {
        self.lock_guard().await.secrets.as_ref().map(f)
    }

    /// Store the first secret of an uninitialized cache and unlock.
    pub async fn initialize(&self, secrets: CachedSecrets) -> Result<()> {
        let mut state = self.lock_guard().await;
        if state.initialized {
            return Err(CacheError::AlreadyInitialized);
        }

        state.initialized = true;
        state.secrets = Some(secrets);
        info!("secret cache initialized");
        self.inner.emit(CacheEvent::Unlocked);

        self.inner.reschedule(&mut state);
        Ok(())
    }

    /// Replace the resident secrets (wiping the old ones) and restart the
    /// timeout.
    pub async fn set_secret(&self, secrets: CachedSecrets) -> Result<()> {
        let mut state = self.lock_guard().await;
        if !state.initialized {
            return Err(CacheError::NotInitialized);
        }

        // the previous secrets, if any, are wiped as they drop here
        state.secrets = Some(secrets);
        info!("secret cache unlocked");
        self.inner.emit(CacheEvent::Unlocked);

        self.inner.reschedule(&mut state);
        Ok(())
    }

    /// Wipe the resident key. A no-op unless unlocked.
    ///
    /// The [`CacheEvent::Locked`] broadcast, not the return of this call, is
    /// what tells other subscribers the key is gone.
    pub async fn lock(&self) {
        let mut state = self.lock_guard().await;
        self.inner.lock_now(&mut state);
    }

    /// Register a client. Cancels any pending timeout.
    pub async fn attach(&self) -> usize {
        let mut state = self.lock_guard().await;
        state.subscribers += 1;
        debug!("attach: {} subscriber(s)", state.subscribers);

        self.inner.reschedule(&mut state);
        state.subscribers
    }

    /// Deregister a client. The last detach arms the timeout.
    ///
    /// Detaching more often than attaching is a bookkeeping bug in the
    /// caller and fails with [`CacheError::UnbalancedDetach`].
    pub async fn detach(&self) -> Result<usize> {
        let mut state = self.lock_guard().await;
        let Some(remaining) = state.subscribers.checked_sub(1) else {
            error!("detach() called with no subscribers attached");
            return Err(CacheError::UnbalancedDetach);
        };

        state.subscribers = remaining;
        debug!("detach: {} subscriber(s)", remaining);

        self.inner.reschedule(&mut state);
        Ok(remaining)
    }

    pub async fn subscribers(&self) -> usize {
        self.lock_guard().await.subscribers
    }

    pub async fn timeout(&self) -> LockTimeout {
        self.lock_guard().await.timeout
    }

    /// Change the timeout and re-evaluate the timer. With no subscribers,
    /// [`LockTimeout::Immediate`] locks before this returns.
    pub async fn set_timeout(&self, timeout: LockTimeout) {
        let mut state = self.lock_guard().await;
        state.timeout = timeout;
        debug!("lock timeout set to {}", timeout);

        self.inner.reschedule(&mut state);
    }

    /// Apply `new` over `current`, rescheduling if the lock timeout changed.
    /// Returns whether a reschedule happened.
    pub async fn apply_settings(&self, current: &mut CacheSettings, new: &CacheSettings) -> bool {
        let reschedule = current.apply(new);
        if reschedule {
            self.set_timeout(current.lock_timeout()).await;
        }
        reschedule
    }

    /// Wipe any resident key and cancel the timer, whatever the state.
    pub async fn shutdown(&self) {
        let mut state = self.lock_guard().await;
        state.cancel_timer();
        self.inner.lock_now(&mut state);
        debug!("secret cache shut down");
    }

    /// Serialize a store read-modify-write with the cache update it leads
    /// to.
    ///
    /// Every session sharing this cache must hold the returned guard from
    /// its first look at the store until the matching [`Self::initialize`]
    /// or [`Self::set_secret`] has returned. Otherwise two sessions can both
    /// see an uninitialized store and leave the cache holding one key while
    /// the store holds the other.
    pub async fn begin_transition(&self) -> MutexGuard<'_, ()> {
        #[cfg(feature = "log-lock-events")]
        tracing::trace!("acquiring secret cache transition");

        self.inner.transitions.lock().await
    }

    async fn lock_guard(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock_guard("caller").await
    }
}

impl Inner {
    async fn lock_guard(&self, site: &'static str) -> MutexGuard<'_, CacheState> {
        #[cfg(feature = "log-lock-events")]
        tracing::trace!("acquiring secret cache state: {}", site);
        #[cfg(not(feature = "log-lock-events"))]
        let _ = site;

        self.state.lock().await
    }

    fn emit(&self, event: CacheEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn lock_now(self: &Arc<Self>, state: &mut CacheState) {
        if state.secrets.take().is_none() {
            return;
        }

        info!("secret cache locked");
        self.emit(CacheEvent::Locked);
        self.reschedule(state);
    }

    /// Arm a timer iff unlocked, unattended and the timeout is finite.
    fn reschedule(self: &Arc<Self>, state: &mut CacheState) {
        state.cancel_timer();

        if state.subscribers > 0 || state.secrets.is_none() {
            return;
        }

        match state.timeout {
            LockTimeout::Never => {}
            LockTimeout::Immediate => {
                debug!("immediate timeout");
                self.lock_now(state);
            }
            LockTimeout::After(delay) => {
                state.generation += 1;
                let generation = state.generation;
                let weak = Arc::downgrade(self);

                let handle = tokio::spawn(
                    async move {
                        tokio::time::sleep(delay).await;
                        Self::on_timeout(weak, generation).await;
                    }
                    .in_current_span(),
                );

                debug!("lock timeout armed for {}s", delay.as_secs());
                state.timer = Some(PendingTimeout { generation, handle });
            }
        }
    }

    async fn on_timeout(weak: Weak<Self>, generation: u64) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut state = inner.lock_guard("lock timeout").await;

        let current = state.timer.as_ref().map(|pending| pending.generation);
        if current != Some(generation) || state.subscribers > 0 {
            debug!("ignoring stale lock timeout");
            return;
        }

        // this task is the pending timer; forget it instead of aborting it
        state.timer = None;
        info!("lock timeout expired");
        inner.lock_now(&mut state);
    }
}
