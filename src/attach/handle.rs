use std::sync::Arc;

use strum::Display;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::ServiceBinder;
use crate::cache::CacheEvent;
use crate::cache::CachedSecrets;
use crate::cache::LockState;
use crate::cache::SecretCache;
use crate::config::settings::KdfSettings;
use crate::crypto::Passphrase;
use crate::crypto::PassphraseSecrets;
use crate::error::CacheError;
use crate::error::Result;
use crate::store::SecretStore;

/// Receives the cache's lock state changes on behalf of one client.
///
/// Callbacks run on a tokio task and must not block.
pub trait CacheSubscriber: Send + Sync + 'static {
    fn on_locked(&self);
    fn on_unlocked(&self);
    fn on_uninitialized(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ConnectionState {
    #[default]
    Null,
    InProgress,
    Active,

    /// Torn down while the bind was in flight; the completion releases it.
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum BindState {
    #[default]
    Null,
    Requested,
    Completed,
}

/// One client session's connection to a shared [`SecretCache`].
///
/// `connect` and `disconnect` may be called in any order and at any time,
/// including while a bind is still in flight. Each active connection counts
/// as one attached subscriber on the cache.
#[derive(Clone)]
pub struct CacheWordHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    binder: Arc<dyn ServiceBinder>,
    store: Arc<dyn SecretStore>,
    kdf: KdfSettings,
    subscriber: Arc<dyn CacheSubscriber>,
    session: Mutex<Session>,
}

#[derive(Debug, Default)]
struct Session {
    connection: ConnectionState,
    bind: BindState,
    cache: Option<SecretCache>,
    forwarder: Option<JoinHandle<()>>,
}

impl Session {
    fn reset(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.cache = None;
        self.connection = ConnectionState::Null;
        self.bind = BindState::Null;
    }
}

impl CacheWordHandle {
    pub fn new(
        binder: Arc<dyn ServiceBinder>,
        store: Arc<dyn SecretStore>,
        kdf: KdfSettings,
        subscriber: Arc<dyn CacheSubscriber>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                binder,
                store,
                kdf,
                subscriber,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.session.lock().await.connection
    }

    pub async fn bind_state(&self) -> BindState {
        self.inner.session.lock().await.bind
    }

    /// Start binding to the cache. A no-op while connecting or connected.
    pub async fn connect(&self) {
        let mut session = self.inner.session.lock().await;

        match session.connection {
            ConnectionState::InProgress | ConnectionState::Active => {
                debug!("connect: already {}", session.connection);
                return;
            }
            ConnectionState::Canceled => {
                // the earlier bind is still in flight; let it complete normally
                debug!("connect: reviving canceled connection");
                session.connection = ConnectionState::InProgress;
                return;
            }
            ConnectionState::Null => {}
        }

        session.connection = ConnectionState::InProgress;
        session.bind = BindState::Requested;

        let bind = self.inner.binder.bind();
        let handle = self.clone();
        tokio::spawn(async move {
            let cache = bind.await;
            handle.on_service_connected(cache).await;
        });
    }

    /// Tear down the connection.
    ///
    /// If the bind has not completed yet, the release is left to its
    /// completion.
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;

        match session.connection {
            ConnectionState::Active => self.teardown(&mut session).await,
            ConnectionState::InProgress => {
                debug!("disconnect: bind in flight, canceling");
                session.connection = ConnectionState::Canceled;
            }
            ConnectionState::Null | ConnectionState::Canceled => {}
        }
    }

    /// Completion of a bind started by [`Self::connect`].
    async fn on_service_connected(&self, cache: Option<SecretCache>) {
        let mut session = self.inner.session.lock().await;

        let cache = match (cache, session.connection) {
            (Some(cache), ConnectionState::InProgress) => cache,
            (None, _) => {
                warn!("bind completed without a cache");
                self.inner.binder.unbind();
                session.reset();
                return;
            }
            (Some(_), ConnectionState::Canceled) => {
                debug!("bind completed after disconnect, releasing");
                self.inner.binder.unbind();
                session.reset();
                return;
            }
            (Some(_), state @ (ConnectionState::Null | ConnectionState::Active)) => {
                error!("bind completed in unexpected state {}, releasing", state);
                self.inner.binder.unbind();
                return;
            }
        };

        cache.attach().await;

        // subscribe before reading the state so no transition is missed
        let events = cache.subscribe();
        let current = cache.state().await;

        session.forwarder = Some(tokio::spawn(forward_events(
            events,
            current,
            self.inner.subscriber.clone(),
        )));
        session.cache = Some(cache);
        session.connection = ConnectionState::Active;
        session.bind = BindState::Completed;
        debug!("connected to secret cache");
    }

    /// The cache went away without this client asking.
    pub async fn on_service_disconnected(&self) {
        let mut session = self.inner.session.lock().await;

        match session.connection {
            ConnectionState::Active => self.teardown(&mut session).await,
            ConnectionState::InProgress => session.connection = ConnectionState::Canceled,
            ConnectionState::Null | ConnectionState::Canceled => {}
        }
    }

    async fn teardown(&self, session: &mut Session) {
        if let Some(cache) = session.cache.take() {
            if let Err(e) = cache.detach().await {
                error!("detach during teardown failed: {}", e);
            }
        }
        if session.bind != BindState::Null {
            self.inner.binder.unbind();
        }
        session.reset();
        debug!("disconnected from secret cache");
    }

    async fn cache(&self) -> Result<SecretCache> {
        let session = self.inner.session.lock().await;
        match (&session.cache, session.connection) {
            (Some(cache), ConnectionState::Active) => Ok(cache.clone()),
            _ => Err(CacheError::NotConnected),
        }
    }

    /// True whenever no key is resident, including while not connected.
    pub async fn is_locked(&self) -> bool {
        match self.cache().await {
            Ok(cache) => cache.is_locked().await,
            Err(_) => true,
        }
    }

    /// Whether a secret has ever been stored. Answered from the store, so
    /// it works without a connection.
    pub fn is_initialized(&self) -> Result<bool> {
        self.inner.store.is_initialized()
    }

    pub async fn get_secret(&self) -> Result<Option<CachedSecrets>> {
        Ok(self.cache().await?.get_secret().await)
    }

    pub async fn with_secret<R>(&self, f: impl FnOnce(&CachedSecrets) -> R) -> Result<Option<R>> {
        Ok(self.cache().await?.with_secret(f).await)
    }

    pub async fn set_secret(&self, secrets: CachedSecrets) -> Result<()> {
        self.cache().await?.set_secret(secrets).await
    }

    /// Lock the cache. A no-op while not connected.
    pub async fn manually_lock(&self) {
        if let Ok(cache) = self.cache().await {
            cache.lock().await;
        }
    }

    /// Create and persist a new secret, then unlock the cache with it.
    ///
    /// Store write and cache update happen inside one cache transition, so
    /// of several sessions initializing at once exactly one succeeds and the
    /// cache ends up with the key the store holds.
    pub async fn initialize(&self, passphrase: Passphrase) -> Result<()> {
        let cache = self.cache().await?;
        let _transition = cache.begin_transition().await;
        if cache.is_initialized().await {
            return Err(CacheError::AlreadyInitialized);
        }

        let store = self.inner.store.clone();
        let kdf = self.inner.kdf;
        let secrets = tokio::task::spawn_blocking(move || {
            PassphraseSecrets::initialize_and_save(&*store, passphrase, &kdf)
        })
        .await??;

        cache.initialize(secrets.into()).await
    }

    /// Unwrap the stored secret and unlock the cache with it.
    ///
    /// On a wrong passphrase the cache stays locked and the store is not
    /// written.
    pub async fn unlock(&self, passphrase: Passphrase) -> Result<()> {
        let cache = self.cache().await?;
        let _transition = cache.begin_transition().await;
        let secrets = self.fetch(passphrase).await?;
        cache.set_secret(secrets.into()).await
    }

    /// Verify `current`, then re-wrap the same key under `new_passphrase`.
    ///
    /// The cache ends up unlocked with an unchanged key.
    pub async fn change_passphrase(&self, current: Passphrase, new_passphrase: Passphrase) -> Result<()> {
        let cache = self.cache().await?;
        let _transition = cache.begin_transition().await;
        let secrets = self.fetch(current).await?;

        let store = self.inner.store.clone();
        let kdf = self.inner.kdf;
        let secrets = tokio::task::spawn_blocking(move || {
            secrets
                .change_passphrase_and_save(&*store, new_passphrase, &kdf)
                .map(|()| secrets)
        })
        .await??;

        cache.set_secret(secrets.into()).await
    }

    /// Must run inside a cache transition: a self-healing upgrade writes
    /// the store.
    async fn fetch(&self, passphrase: Passphrase) -> Result<PassphraseSecrets> {
        let store = self.inner.store.clone();
        let kdf = self.inner.kdf;
        let secrets = tokio::task::spawn_blocking(move || {
            PassphraseSecrets::fetch_from_store(&*store, passphrase, &kdf)
        })
        .await??;
        Ok(secrets)
    }
}

impl std::fmt::Debug for CacheWordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWordHandle")
            .field("store", &self.inner.store)
            .field("kdf", &self.inner.kdf)
            .finish_non_exhaustive()
    }
}

/// Report `current`, then every later event, to `subscriber`.
async fn forward_events(
    mut events: broadcast::Receiver<CacheEvent>,
    current: LockState,
    subscriber: Arc<dyn CacheSubscriber>,
) {
    notify(&*subscriber, current.into());

    loop {
        match events.recv().await {
            Ok(event) => notify(&*subscriber, event),
            Err(RecvError::Lagged(missed)) => warn!("subscriber missed {} cache events", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

fn notify(subscriber: &dyn CacheSubscriber, event: CacheEvent) {
    match event {
        CacheEvent::Locked => subscriber.on_locked(),
        CacheEvent::Unlocked => subscriber.on_unlocked(),
        CacheEvent::Uninitialized => subscriber.on_uninitialized(),
    }
}
