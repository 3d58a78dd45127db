//! In-memory session store for exercising the claim/wait protocol.
//!
//! Implements the full `SessionStore` capability surface with consul-like
//! semantics: sessions with lock-delay, CAS attach/detach, a global
//! monotonic change index, and blocking indexed reads. Sessions can be
//! expired externally to simulate a store-initiated revocation.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use ipc_mutex_consul::{KeyState, SessionConfig, SessionStore};
use ipc_mutex_core::{ConnectionDescriptor, MutexError, MutexResult};
use tokio::sync::Notify;

#[derive(Default)]
struct State {
    sessions: HashMap<String, Duration>, // session id -> lock-delay
    keys: HashMap<String, KeyRecord>,
    next_session: u64,
    index: u64,
}

#[derive(Default, Clone)]
struct KeyRecord {
    session: Option<String>,
    modify_index: u64,
    // claims are rejected until this instant (post-release lock-delay)
    not_before: Option<Instant>,
}

/// Shared in-memory backing store; all mutexes under test hold one `Arc`.
#[derive(Default)]
pub struct MemorySessionStore {
    state: StdMutex<State>,
    changed: Notify,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a store-initiated session expiry: the session disappears
    /// and any key attached to it is released after its lock-delay.
    pub fn expire_session(&self, session: &str) {
        let mut state = self.state.lock().unwrap();
        self.drop_session(&mut state, session);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Session currently attached to `key`, if any.
    pub fn holder(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.keys.get(key).and_then(|k| k.session.clone())
    }

    fn drop_session(&self, state: &mut State, session: &str) {
        let lock_delay = state.sessions.remove(session).unwrap_or_default();
        let attached: Vec<String> = state
            .keys
            .iter()
            .filter(|(_, record)| record.session.as_deref() == Some(session))
            .map(|(name, _)| name.clone())
            .collect();
        for name in attached {
            state.index += 1;
            let index = state.index;
            if let Some(record) = state.keys.get_mut(&name) {
                record.session = None;
                record.not_before = Some(Instant::now() + lock_delay);
                record.modify_index = index;
            }
        }
    }

    fn snapshot(&self, key: &str) -> KeyState {
        let state = self.state.lock().unwrap();
        match state.keys.get(key) {
            Some(record) => KeyState {
                session: record.session.clone(),
                index: record.modify_index,
            },
            None => KeyState {
                session: None,
                index: 0,
            },
        }
    }
}

impl SessionStore for MemorySessionStore {
    async fn connect(_descriptor: &ConnectionDescriptor) -> MutexResult<Self> {
        Ok(Self::new())
    }

    async fn create_session(&self, config: &SessionConfig) -> MutexResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_session += 1;
        let id = format!("session-{}", state.next_session);
        state.sessions.insert(id.clone(), config.lock_delay);
        Ok(id)
    }

    async fn renew_session(&self, session: &str) -> MutexResult<()> {
        let state = self.state.lock().unwrap();
        if state.sessions.contains_key(session) {
            Ok(())
        } else {
            Err(MutexError::Backend(
                format!("unknown session {session}").into(),
            ))
        }
    }

    async fn destroy_session(&self, session: &str) -> MutexResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains_key(session) {
            return Err(MutexError::Backend(
                format!("unknown session {session}").into(),
            ));
        }
        self.drop_session(&mut state, session);
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn acquire_key(&self, key: &str, _value: &str, session: &str) -> MutexResult<bool> {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains_key(session) {
            return Ok(false); // expired sessions cannot claim
        }
        let next_index = state.index + 1;
        let record = state.keys.entry(key.to_string()).or_default();
        if record.session.is_some() {
            return Ok(false);
        }
        if let Some(not_before) = record.not_before {
            if Instant::now() < not_before {
                return Ok(false); // inside the lock-delay window
            }
        }
        record.session = Some(session.to_string());
        record.not_before = None;
        record.modify_index = next_index;
        state.index = next_index;
        drop(state);
        self.changed.notify_waiters();
        Ok(true)
    }

    async fn release_key(&self, key: &str, _value: &str, session: &str) -> MutexResult<bool> {
        let mut state = self.state.lock().unwrap();
        let lock_delay = state.sessions.get(session).copied().unwrap_or_default();
        let next_index = state.index + 1;
        let Some(record) = state.keys.get_mut(key) else {
            return Ok(false);
        };
        if record.session.as_deref() != Some(session) {
            return Ok(false);
        }
        record.session = None;
        record.not_before = Some(Instant::now() + lock_delay);
        record.modify_index = next_index;
        state.index = next_index;
        drop(state);
        self.changed.notify_waiters();
        Ok(true)
    }

    async fn read_key(
        &self,
        key: &str,
        index: Option<u64>,
        wait: Duration,
    ) -> MutexResult<KeyState> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // register for wakeups before inspecting state, so a change
            // landing in between is not missed
            notified.as_mut().enable();
            let snapshot = self.snapshot(key);
            match index {
                None => return Ok(snapshot),
                Some(seen) if snapshot.index != seen => return Ok(snapshot),
                _ => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(snapshot);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(remaining) => return Ok(self.snapshot(key)),
            }
        }
    }
}
