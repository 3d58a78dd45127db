//! Backing-store capability seam for the session/CAS strategy.

use std::future::Future;
use std::time::Duration;

use ipc_mutex_core::prelude::*;

/// Parameters of a session to be created.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session name, for operator visibility in the store.
    pub name: String,
    /// Time-to-live; the store unilaterally expires a session that is not
    /// renewed within this window.
    pub ttl: Duration,
    /// Minimum pause the store enforces after a release/expiry before the
    /// key can be claimed again.
    pub lock_delay: Duration,
}

/// Observed state of the lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyState {
    /// Session currently attached to the key, if any.
    pub session: Option<String>,
    /// Monotonically increasing index; pass it back to
    /// [`SessionStore::read_key`] to block until the key changes again.
    pub index: u64,
}

/// Capability surface of a consistent store with sessions.
///
/// This is the complete set of operations the strategy composes: session
/// create/renew/destroy, a compare-and-swap write that attaches or detaches
/// a session, and a blocking indexed read. Wire protocol, TLS, and
/// credentials live entirely behind this seam.
pub trait SessionStore: Send + Sync + 'static {
    /// Connects to the store addressed by the descriptor.
    ///
    /// Reads TLS material referenced by the descriptor synchronously.
    fn connect(
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = MutexResult<Self>> + Send
    where
        Self: Sized;

    /// Creates a session, returning its opaque id.
    ///
    /// A lock attached to the session is released by the store itself once
    /// the session expires (release-on-expiry behavior).
    fn create_session(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = MutexResult<String>> + Send;

    /// Renews a session, restarting its TTL window.
    fn renew_session(&self, session: &str) -> impl Future<Output = MutexResult<()>> + Send;

    /// Destroys a session, detaching any lock bound to it.
    fn destroy_session(&self, session: &str) -> impl Future<Output = MutexResult<()>> + Send;

    /// CAS-acquire: attaches `session` to `key` only if the key is currently
    /// unattached. Returns whether the attach succeeded. A `false` result is
    /// an expected negative, not an error.
    fn acquire_key(
        &self,
        key: &str,
        value: &str,
        session: &str,
    ) -> impl Future<Output = MutexResult<bool>> + Send;

    /// CAS-release: detaches `key` only if it is attached to `session`.
    /// Returns whether a detach actually happened.
    fn release_key(
        &self,
        key: &str,
        value: &str,
        session: &str,
    ) -> impl Future<Output = MutexResult<bool>> + Send;

    /// Blocking read: returns immediately when `index` is `None` or stale,
    /// otherwise suspends until the key changes or `wait` elapses.
    fn read_key(
        &self,
        key: &str,
        index: Option<u64>,
        wait: Duration,
    ) -> impl Future<Output = MutexResult<KeyState>> + Send;
}
