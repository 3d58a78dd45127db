//! Single-process strategy for ipc-mutex.
//!
//! Delegates to an in-memory queueing mutex scoped to the current process.
//! Concurrent tasks contending for the same resource name are granted the
//! lock in FIFO order by tokio's fair mutex. No network I/O is involved.

pub mod mutex;
mod registry;

pub use mutex::SpmMutex;
