//! Process-cluster mutex strategy.

use std::time::Duration;

use ipc_mutex_core::prelude::*;
use tracing::{debug, instrument};

use crate::channel::{ClusterRequest, LocalChannel};
use crate::hub::ClusterHub;

/// Cluster-unique id for one acquire attempt.
fn next_request_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// The cluster role is an explicit constructor input, never ambient state.
enum Role {
    /// Owns the hub; spawns its serve loop on `open()`.
    Primary { hub: ClusterHub },
    /// Forwards calls to a primary over the given channel.
    Worker { seed: LocalChannel },
}

/// Mutex strategy for the multi-process model (`mpm:`).
///
/// Construct the primary first, `open()` it, then hand
/// [`channel()`](Self::channel) to workers:
///
/// ```rust,ignore
/// let mut primary = MpmMutex::primary(&descriptor);
/// primary.open().await?;
/// let mut worker = MpmMutex::worker(&descriptor, primary.channel()?.clone());
/// worker.open().await?;
/// ```
pub struct MpmMutex {
    resource: String,
    role: Role,
    channel: Option<LocalChannel>,
    lifecycle: Lifecycle,
}

impl MpmMutex {
    /// Creates the primary member. Performs no I/O until `open()`.
    pub fn primary(descriptor: &ConnectionDescriptor) -> Self {
        Self {
            resource: descriptor.resource.clone(),
            role: Role::Primary {
                hub: ClusterHub::new(),
            },
            channel: None,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Creates a worker member forwarding to a primary over `channel`.
    pub fn worker(descriptor: &ConnectionDescriptor, channel: LocalChannel) -> Self {
        Self {
            resource: descriptor.resource.clone(),
            role: Role::Worker { seed: channel },
            channel: None,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Channel to this primary's hub, for wiring up workers.
    ///
    /// Available once the primary is open.
    pub fn channel(&self) -> MutexResult<&LocalChannel> {
        self.lifecycle.ensure_opened()?;
        self.channel.as_ref().ok_or(MutexError::NotOpened)
    }

    fn active_channel(&self) -> MutexResult<LocalChannel> {
        self.lifecycle.ensure_opened()?;
        self.channel.clone().ok_or(MutexError::NotOpened)
    }
}

impl LockStrategy for MpmMutex {
    async fn open(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_not_opened()?;
        let channel = match &self.role {
            Role::Primary { hub } => LocalChannel::spawn(hub.clone()),
            Role::Worker { seed } => seed.clone(),
        };
        channel.call(ClusterRequest::Register).await?;
        self.channel = Some(channel);
        self.lifecycle.set_opened(true);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.resource, backend = "mpm"))]
    async fn acquire(&mut self, timeout: Option<Duration>) -> MutexResult<()> {
        self.lifecycle.ensure_not_locked()?;
        let channel = self.active_channel()?;
        let request = next_request_id();
        let call = channel.call(ClusterRequest::Acquire {
            resource: self.resource.clone(),
            request,
        });
        match timeout {
            None => call.await?,
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result?,
                Err(_) => {
                    // the hub may still grant the attempt; withdraw it so
                    // the grant is reaped when (and if) it lands
                    debug!(resource = %self.resource, request, "acquire deadline expired, withdrawing");
                    let _ = channel
                        .call(ClusterRequest::Abandon {
                            resource: self.resource.clone(),
                            request,
                        })
                        .await;
                    return Err(MutexError::Timeout(limit));
                }
            },
        }
        self.lifecycle.set_locked(true);
        Ok(())
    }

    async fn release(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_locked()?;
        let channel = self.active_channel()?;
        channel
            .call(ClusterRequest::Release {
                resource: self.resource.clone(),
            })
            .await?;
        self.lifecycle.set_locked(false);
        Ok(())
    }

    async fn close(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_opened()?;
        let mut first_failure = None;
        if self.lifecycle.is_locked() {
            if let Err(e) = self.release().await {
                first_failure = Some(e);
            }
        }
        if let (Role::Primary { .. }, Some(channel)) = (&self.role, &self.channel) {
            let result = channel
                .call(ClusterRequest::Destroy {
                    resource: self.resource.clone(),
                })
                .await;
            if let (Err(e), None) = (result, &first_failure) {
                first_failure = Some(e);
            }
        }
        self.channel = None;
        self.lifecycle.set_opened(false);
        match first_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
