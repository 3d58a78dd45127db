//! Single-process mutex strategy.

use std::time::Duration;

use ipc_mutex_core::prelude::*;
use tokio::sync::OwnedMutexGuard;
use tracing::instrument;

use crate::registry;

/// Mutex strategy for the single-process model (`spm:`).
///
/// All instances for the same resource name within one process share a
/// FIFO-fair in-memory queueing mutex. Holding the guard is what holds the
/// lock; releasing drops it.
pub struct SpmMutex {
    resource: String,
    lifecycle: Lifecycle,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SpmMutex {
    /// Creates the strategy from a parsed descriptor. Performs no I/O.
    pub fn new(descriptor: &ConnectionDescriptor) -> Self {
        Self {
            resource: descriptor.resource.clone(),
            lifecycle: Lifecycle::new(),
            guard: None,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl LockStrategy for SpmMutex {
    async fn open(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_not_opened()?;
        self.lifecycle.set_opened(true);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.resource, backend = "spm"))]
    async fn acquire(&mut self, timeout: Option<Duration>) -> MutexResult<()> {
        self.lifecycle.ensure_not_locked()?;
        let slot = registry::slot(&self.resource);
        let guard = match timeout {
            None => slot.lock_owned().await,
            Some(limit) => tokio::time::timeout(limit, slot.lock_owned())
                .await
                .map_err(|_| MutexError::Timeout(limit))?,
        };
        self.guard = Some(guard);
        self.lifecycle.set_locked(true);
        Ok(())
    }

    async fn release(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_locked()?;
        self.guard = None;
        self.lifecycle.set_locked(false);
        Ok(())
    }

    async fn close(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_opened()?;
        if self.lifecycle.is_locked() {
            self.release().await?;
        }
        self.lifecycle.set_opened(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::parse(&format!("spm:{name}")).unwrap()
    }

    #[tokio::test]
    async fn acquire_before_open_fails() {
        let mut m = SpmMutex::new(&descriptor("spm-unit-a"));
        assert!(matches!(m.acquire(None).await, Err(MutexError::NotOpened)));
    }

    #[tokio::test]
    async fn second_acquire_on_same_instance_fails() {
        let mut m = SpmMutex::new(&descriptor("spm-unit-b"));
        m.open().await.unwrap();
        m.acquire(None).await.unwrap();
        assert!(matches!(
            m.acquire(None).await,
            Err(MutexError::AlreadyAcquired)
        ));
        m.close().await.unwrap();
    }

    #[tokio::test]
    async fn contending_instance_times_out() {
        let d = descriptor("spm-unit-c");
        let mut holder = SpmMutex::new(&d);
        holder.open().await.unwrap();
        holder.acquire(None).await.unwrap();

        let mut waiter = SpmMutex::new(&d);
        waiter.open().await.unwrap();
        let result = waiter.acquire(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(MutexError::Timeout(_))));

        holder.close().await.unwrap();
        waiter.acquire(Some(Duration::from_millis(100))).await.unwrap();
        waiter.close().await.unwrap();
    }
}
