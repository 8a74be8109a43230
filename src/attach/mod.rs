//! Client sessions attaching to a shared [`crate::cache::SecretCache`].
//!
//! A [`CacheWordHandle`] binds to the cache through a [`ServiceBinder`],
//! attaches as a subscriber once the bind completes, and forwards lock
//! state changes to its [`CacheSubscriber`]. Tearing down while the bind is
//! still in flight is safe: the late completion releases the binding without
//! ever attaching.

mod binder;
mod handle;

pub use binder::LocalServiceBinder;
pub use binder::ServiceBinder;
pub use handle::BindState;
pub use handle::CacheSubscriber;
pub use handle::CacheWordHandle;
pub use handle::ConnectionState;
