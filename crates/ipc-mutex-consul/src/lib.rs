//! Session-leased compare-and-swap strategy for ipc-mutex.
//!
//! Implements leader election over a consistent key/value store in the style
//! of Consul's session/KV API: a time-bounded session is attached to a lock
//! key through a compare-and-swap write, renewed in the background while the
//! mutex is open, and waiters follow the key through blocking indexed reads.
//!
//! The store itself sits behind the [`SessionStore`] seam;
//! [`HttpSessionStore`] implements it against Consul's HTTP API, and tests
//! substitute an in-memory store.

pub mod http;
pub mod mutex;
pub mod store;

pub use http::HttpSessionStore;
pub use mutex::ConsulMutex;
pub use store::{KeyState, SessionConfig, SessionStore};
