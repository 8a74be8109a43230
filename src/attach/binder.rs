use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::error;

use crate::cache::SecretCache;

/// Transport that hands out a shared [`SecretCache`].
///
/// `bind` may complete long after it is called, and the caller may have lost
/// interest by then. Every `bind` that was issued must be paired with exactly
/// one `unbind`, whether or not its future yielded a cache.
pub trait ServiceBinder: Send + Sync + 'static {
    /// Request the cache. Resolves to `None` if the cache is unavailable.
    fn bind(&self) -> BoxFuture<'static, Option<SecretCache>>;

    /// Release a binding obtained from [`ServiceBinder::bind`].
    fn unbind(&self);
}

/// Binds to a cache living in the same process.
#[derive(Debug)]
pub struct LocalServiceBinder {
    cache: SecretCache,
    outstanding: AtomicUsize,
}

impl LocalServiceBinder {
    pub fn new(cache: SecretCache) -> Self {
        Self {
            cache,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Bindings requested and not yet released.
    pub fn outstanding_bindings(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

impl ServiceBinder for LocalServiceBinder {
    fn bind(&self) -> BoxFuture<'static, Option<SecretCache>> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let cache = self.cache.clone();

        // completes on a later poll, like a real transport would
        async move {
            tokio::task::yield_now().await;
            Some(cache)
        }
        .boxed()
    }

    fn unbind(&self) {
        let released = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        if released.is_err() {
            error!("unbind() called with no outstanding binding");
        }
    }
}
