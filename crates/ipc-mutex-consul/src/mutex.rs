//! Session-leased CAS mutex strategy.

use std::sync::Arc;
use std::time::Duration;

use ipc_mutex_core::prelude::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::http::HttpSessionStore;
use crate::store::{SessionConfig, SessionStore};

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15);
const DEFAULT_READ_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_DELAY: Duration = Duration::from_secs(2);
/// Renewal fires at this fraction of the session TTL, strictly before expiry.
const RENEWAL_FRACTION: f64 = 0.9;

/// The opaque holder marker stored in the lock key.
const HOLDER_MARKER: &str = "leader";

struct RenewalTask {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Mutex strategy for the remote-process model over a Consul-style
/// session/KV store (`rpm+consul:`).
///
/// `open()` creates a session with release-on-expiry behavior and renews it
/// in the background at 0.9× its TTL. `acquire()` runs a claim/wait loop:
/// a CAS write attaches the session to the lock key, and losers follow the
/// key through blocking indexed reads, re-claiming only after the post-release
/// lock-delay window.
///
/// Known hazard: if the store expires the
/// session behind our back (sustained renewal failure), the local locked flag
/// goes stale; the loss surfaces only when `release()`/`close()` next talk to
/// the store, and `release()` still reports success. Callers that need
/// earlier detection must watch the session themselves.
pub struct ConsulMutex<S: SessionStore = HttpSessionStore> {
    descriptor: ConnectionDescriptor,
    key: String,
    session_ttl: Duration,
    read_wait: Duration,
    lock_delay: Duration,
    lifecycle: Lifecycle,
    preconnected: Option<Arc<S>>,
    store: Option<Arc<S>>,
    session: Option<String>,
    renewal: Option<RenewalTask>,
}

impl ConsulMutex<HttpSessionStore> {
    /// Creates the strategy from a parsed descriptor. Performs no I/O; the
    /// HTTP client is built by `open()`.
    pub fn new(descriptor: &ConnectionDescriptor) -> Self {
        Self::from_parts(descriptor, None)
    }
}

impl<S: SessionStore> ConsulMutex<S> {
    /// Creates the strategy over an already-connected store.
    ///
    /// Lets several mutex instances (and tests) share one store.
    pub fn with_store(descriptor: &ConnectionDescriptor, store: Arc<S>) -> Self {
        Self::from_parts(descriptor, Some(store))
    }

    fn from_parts(descriptor: &ConnectionDescriptor, preconnected: Option<Arc<S>>) -> Self {
        Self {
            key: format!("IPC-Mutex-RPM/{}/leader", descriptor.resource),
            session_ttl: descriptor.ttl.unwrap_or(DEFAULT_SESSION_TTL),
            read_wait: descriptor.read_wait.unwrap_or(DEFAULT_READ_WAIT),
            lock_delay: descriptor.lock_delay.unwrap_or(DEFAULT_LOCK_DELAY),
            descriptor: descriptor.clone(),
            lifecycle: Lifecycle::new(),
            preconnected,
            store: None,
            session: None,
            renewal: None,
        }
    }

    /// The lock key this mutex claims.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current session id, while open.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn active(&self) -> MutexResult<(Arc<S>, String)> {
        match (&self.store, &self.session) {
            (Some(store), Some(session)) => Ok((store.clone(), session.clone())),
            _ => Err(MutexError::NotOpened),
        }
    }

    /// Renewal is fire-and-forget: a transient failure self-heals on the
    /// next tick, at the cost of the session possibly expiring unnoticed
    /// under sustained store unavailability.
    fn spawn_renewal(&mut self, store: Arc<S>, session: String) {
        let (stop, mut stopped) = watch::channel(false);
        let period = self.session_ttl.mul_f64(RENEWAL_FRACTION);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {
                        if let Err(e) = store.renew_session(&session).await {
                            debug!(session = %session, error = %e, "session renewal failed");
                        }
                    }
                }
            }
        });
        self.renewal = Some(RenewalTask { stop, task });
    }

    async fn stop_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            let _ = renewal.stop.send(true);
            // wait the task out so a renewal in flight cannot outlive close()
            let _ = renewal.task.await;
        }
    }

    /// The claim/wait loop. Unbounded; the caller applies any deadline.
    async fn claim_loop(&self, store: &S, session: &str) -> MutexResult<()> {
        let mut wait_index: Option<u64> = None;
        loop {
            // Claim: only one caller can observe "unattached" and win
            if store.acquire_key(&self.key, HOLDER_MARKER, session).await? {
                return Ok(());
            }
            // Wait: follow the key until it becomes free
            loop {
                let state = store
                    .read_key(&self.key, wait_index, self.read_wait)
                    .await?;
                wait_index = Some(state.index);
                match state.session {
                    None => {
                        // free; pause through the store's lock-delay window
                        // before re-claiming to avoid a thundering herd
                        debug!(key = %self.key, "lock free, re-claiming after lock-delay");
                        tokio::time::sleep(self.lock_delay).await;
                        break;
                    }
                    Some(_) => {
                        // still held: pure long-poll continuation, no delay
                        continue;
                    }
                }
            }
        }
    }
}

impl<S: SessionStore> LockStrategy for ConsulMutex<S> {
    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "consul"))]
    async fn open(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_not_opened()?;
        let store = match &self.preconnected {
            Some(store) => store.clone(),
            None => Arc::new(S::connect(&self.descriptor).await?),
        };
        let config = SessionConfig {
            name: format!("IPC-Mutex-RPM/{}/session", self.descriptor.resource),
            ttl: self.session_ttl,
            lock_delay: self.lock_delay,
        };
        let session = store.create_session(&config).await?;
        self.spawn_renewal(store.clone(), session.clone());
        self.store = Some(store);
        self.session = Some(session);
        self.lifecycle.set_opened(true);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "consul", timeout = ?timeout))]
    async fn acquire(&mut self, timeout: Option<Duration>) -> MutexResult<()> {
        self.lifecycle.ensure_not_locked()?;
        let (store, session) = self.active()?;
        match timeout {
            None => self.claim_loop(&store, &session).await?,
            Some(limit) => {
                match tokio::time::timeout(limit, self.claim_loop(&store, &session)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        // a CAS write may have landed after the deadline;
                        // detach best effort so the key does not stay ours
                        let _ = store.release_key(&self.key, HOLDER_MARKER, &session).await;
                        return Err(MutexError::Timeout(limit));
                    }
                }
            }
        }
        self.lifecycle.set_locked(true);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "consul"))]
    async fn release(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_locked()?;
        let (store, session) = self.active()?;
        // idempotent from the caller's perspective: the flag clears even if
        // the store reports the detach as unnecessary
        store.release_key(&self.key, HOLDER_MARKER, &session).await?;
        self.lifecycle.set_locked(false);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "consul"))]
    async fn close(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_opened()?;
        let mut first_failure = None;
        if self.lifecycle.is_locked() {
            if let Err(e) = self.release().await {
                first_failure = Some(e);
            }
        }
        self.stop_renewal().await;
        if let Some(session) = self.session.take() {
            if let Some(store) = &self.store {
                let result = store.destroy_session(&session).await;
                if let (Err(e), None) = (result, &first_failure) {
                    first_failure = Some(e);
                }
            }
        }
        self.store = None;
        self.lifecycle.set_opened(false);
        match first_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
