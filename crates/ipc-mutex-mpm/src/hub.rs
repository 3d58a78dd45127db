//! Primary-side lock state for the process-cluster strategy.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::channel::{ClusterReply, ClusterRequest};

/// Serializes lock grants for the whole cluster.
///
/// The hub owns one FIFO-fair slot per resource name plus the guard of the
/// current holder. A resource's `Acquire` blocks until the previous holder's
/// `Release` drops the guard. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ClusterHub {
    inner: Arc<HubInner>,
}

struct Holder {
    request: u64,
    _guard: OwnedMutexGuard<()>,
}

#[derive(Default)]
struct HubInner {
    slots: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    held: StdMutex<HashMap<String, Holder>>,
    // acquire attempts withdrawn before their grant landed; the grant is
    // dropped on arrival instead of being parked forever
    abandoned: StdMutex<HashSet<u64>>,
}

impl ClusterHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, resource: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.inner.slots.lock().expect("hub slots poisoned");
        slots
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Handles one cluster request. May suspend while a grant is pending.
    pub async fn handle(&self, request: ClusterRequest) -> ClusterReply {
        match request {
            ClusterRequest::Register => Ok(()),
            ClusterRequest::Acquire { resource, request } => {
                let slot = self.slot(&resource);
                let guard = slot.lock_owned().await;
                let withdrawn = self
                    .inner
                    .abandoned
                    .lock()
                    .expect("hub abandoned set poisoned")
                    .remove(&request);
                if withdrawn {
                    debug!(resource, request, "dropping grant for withdrawn acquire");
                    drop(guard);
                    return Err("acquire abandoned".to_string());
                }
                self.inner
                    .held
                    .lock()
                    .expect("hub holders poisoned")
                    .insert(
                        resource,
                        Holder {
                            request,
                            _guard: guard,
                        },
                    );
                Ok(())
            }
            ClusterRequest::Release { resource } => {
                match self
                    .inner
                    .held
                    .lock()
                    .expect("hub holders poisoned")
                    .remove(&resource)
                {
                    Some(_holder) => Ok(()),
                    None => Err("still not acquired".to_string()),
                }
            }
            ClusterRequest::Abandon { resource, request } => {
                let mut held = self.inner.held.lock().expect("hub holders poisoned");
                match held.get(&resource) {
                    // the grant landed between the deadline and the
                    // withdrawal: release it
                    Some(holder) if holder.request == request => {
                        held.remove(&resource);
                    }
                    // still pending: mark the attempt for reaping on arrival
                    _ => {
                        self.inner
                            .abandoned
                            .lock()
                            .expect("hub abandoned set poisoned")
                            .insert(request);
                    }
                }
                Ok(())
            }
            ClusterRequest::Destroy { resource } => {
                self.inner
                    .held
                    .lock()
                    .expect("hub holders poisoned")
                    .remove(&resource);
                Ok(())
            }
        }
    }
}
