//! Redis strategy for ipc-mutex.
//!
//! The lock key is set with `SET NX PX` carrying a unique holder id; release
//! runs a Lua script that deletes the key only if the holder id still
//! matches, so an expired-and-reclaimed lock is never deleted by a previous
//! holder. The TTL bounds how long a crashed holder can wedge the lock.

pub mod mutex;

pub use mutex::RedisMutex;
