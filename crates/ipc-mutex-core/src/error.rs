//! Error types for mutex operations.

use std::time::Duration;
use thiserror::Error;

/// Boxed error from a backing store client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during mutex operations.
#[derive(Error, Debug)]
pub enum MutexError {
    /// `open()` was called on an already-open mutex.
    #[error("mutex already opened")]
    AlreadyOpened,

    /// An operation other than `open()` was called on a mutex that is not open.
    #[error("mutex still not opened")]
    NotOpened,

    /// `release()` was called without a prior successful `acquire()`.
    #[error("mutex still not acquired")]
    NotAcquired,

    /// `acquire()` was called while the lock is already held by this instance.
    #[error("mutex already acquired")]
    AlreadyAcquired,

    /// The connection URL scheme does not select a known strategy.
    #[error("unknown implementation strategy \"{0}\"")]
    UnknownStrategy(String),

    /// The connection URL could not be parsed or lacks a required component.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),

    /// The resource name is missing or malformed.
    #[error("invalid mutex id: {0}")]
    InvalidResource(String),

    /// A deadline-bounded `acquire()` expired before the lock was obtained.
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// Backend connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(#[source] BoxError),

    /// The backing store reported a failure.
    #[error("backend error: {0}")]
    Backend(#[source] BoxError),
}

impl MutexError {
    /// Returns true for out-of-order operation errors.
    ///
    /// Usage errors are always local and synchronous; retrying the same call
    /// without changing the mutex state will fail again.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOpened | Self::NotOpened | Self::NotAcquired | Self::AlreadyAcquired
        )
    }

    /// Returns true for errors caused by a malformed connection URL.
    ///
    /// Configuration errors are fatal to the mutex instance that raised them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownStrategy(_) | Self::InvalidUrl(_) | Self::InvalidResource(_)
        )
    }
}

/// Result type for mutex operations.
pub type MutexResult<T> = Result<T, MutexError>;
