//! Process-wide registry of lock slots keyed by resource name.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, OnceLock};

use tokio::sync::Mutex as AsyncMutex;

type SlotMap = HashMap<String, std::sync::Arc<AsyncMutex<()>>>;

static REGISTRY: OnceLock<StdMutex<SlotMap>> = OnceLock::new();

/// Returns the shared slot for `resource`, creating it on first use.
///
/// Two mutex instances in the same process with the same resource name
/// contend on the same slot. Slots are never removed; the set of resource
/// names in one process is expected to be small and stable.
pub(crate) fn slot(resource: &str) -> std::sync::Arc<AsyncMutex<()>> {
    let registry = REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()));
    let mut map = registry.lock().expect("slot registry poisoned");
    map.entry(resource.to_string())
        .or_insert_with(|| std::sync::Arc::new(AsyncMutex::new(())))
        .clone()
}
