//! The strategy contract shared by every backend.

use std::future::Future;
use std::time::Duration;

use crate::error::MutexResult;

/// One backend-specific implementation of the mutex contract.
///
/// A strategy owns all backend resources for one mutex instance (connection,
/// session, timers) and tracks whether the instance is open and whether the
/// lock is currently held. All implementations signal the same usage errors
/// for out-of-order operations:
///
/// - `open()` fails with `AlreadyOpened` on an already-open instance
/// - `acquire()`/`release()`/`close()` fail with `NotOpened` before `open()`
/// - `acquire()` fails with `AlreadyAcquired` while the lock is held
/// - `release()` fails with `NotAcquired` while the lock is not held
///
/// `close()` implicitly releases a held lock, tears down backend resources,
/// and leaves the instance reopenable; a second `close()` fails with
/// `NotOpened` rather than double-freeing backend resources.
///
/// # Example
///
/// ```rust,ignore
/// let mut mutex = Mutex::new("spm:my-resource")?;
/// mutex.open().await?;
/// mutex.acquire(None).await?;
/// critical_section().await;
/// mutex.release().await?;
/// mutex.close().await?;
/// ```
pub trait LockStrategy: Send {
    /// Establishes backend resources and marks the instance open.
    fn open(&mut self) -> impl Future<Output = MutexResult<()>> + Send;

    /// Obtains the lock, waiting up to `timeout`.
    ///
    /// `None` waits indefinitely; `Some(d)` fails
    /// with `Timeout(d)` once the deadline expires.
    fn acquire(&mut self, timeout: Option<Duration>)
        -> impl Future<Output = MutexResult<()>> + Send;

    /// Releases the lock.
    ///
    /// Marks the instance unlocked once the backend round-trip completes,
    /// even if the backend reports the detach as unnecessary.
    fn release(&mut self) -> impl Future<Output = MutexResult<()>> + Send;

    /// Releases a held lock, tears down backend resources, and marks the
    /// instance not open.
    ///
    /// Teardown is always attempted in full; the first failure encountered
    /// is reported rather than swallowed.
    fn close(&mut self) -> impl Future<Output = MutexResult<()>> + Send;
}
