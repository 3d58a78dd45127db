//! Shared lifecycle state machine.
//!
//! Every strategy honors the same ordering discipline:
//! `CLOSED → OPEN(unlocked) → OPEN(locked) → OPEN(unlocked) → … → CLOSED`.
//! This guard centralizes the legality checks so all strategies signal
//! identical usage errors. Local flags are updated only after the backend
//! confirms success, so a failed operation leaves the mutex retryable.

use crate::error::{MutexError, MutexResult};

/// Tracks the open/locked flags of one mutex instance.
///
/// Owned exclusively by one strategy instance; callers must not issue
/// overlapping operations on the same mutex without external serialization.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lifecycle {
    opened: bool,
    locked: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Guard for `open()`: fails with `AlreadyOpened` on a second open.
    pub fn ensure_not_opened(&self) -> MutexResult<()> {
        if self.opened {
            Err(MutexError::AlreadyOpened)
        } else {
            Ok(())
        }
    }

    /// Guard for `acquire()`/`release()`/`close()`: fails with `NotOpened`.
    pub fn ensure_opened(&self) -> MutexResult<()> {
        if self.opened {
            Ok(())
        } else {
            Err(MutexError::NotOpened)
        }
    }

    /// Guard for `acquire()`: fails with `AlreadyAcquired` while locked.
    pub fn ensure_not_locked(&self) -> MutexResult<()> {
        self.ensure_opened()?;
        if self.locked {
            Err(MutexError::AlreadyAcquired)
        } else {
            Ok(())
        }
    }

    /// Guard for `release()`: fails with `NotAcquired` while unlocked.
    pub fn ensure_locked(&self) -> MutexResult<()> {
        self.ensure_opened()?;
        if self.locked {
            Ok(())
        } else {
            Err(MutexError::NotAcquired)
        }
    }

    pub fn set_opened(&mut self, opened: bool) {
        self.opened = opened;
        if !opened {
            self.locked = false;
        }
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }
}
