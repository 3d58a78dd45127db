//! PostgreSQL advisory-lock strategy for ipc-mutex.
//!
//! Advisory locks are cooperative, session-scoped locks keyed by a 64-bit
//! integer; the key is derived by hashing the resource name. The lock lives
//! on one dedicated connection and is released by the server if that
//! connection dies.

pub mod key;
pub mod mutex;

pub use key::advisory_key;
pub use mutex::PostgresMutex;
