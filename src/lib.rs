//! Inter-process mutual exclusion locks with pluggable backends.
//!
//! One abstract mutex interface (open, acquire, release, close) whose
//! locking semantics come from an interchangeable backend strategy selected
//! by a URL-shaped connection identifier:
//!
//! | scheme        | strategy                                             |
//! |---------------|------------------------------------------------------|
//! | `spm:`        | in-process FIFO queueing mutex                       |
//! | `mpm://`      | process cluster, primary serializes grants           |
//! | `rpm+consul:` | session-leased CAS leader election (Consul)          |
//! | `rpm+redis:`  | `SET NX` lock with ownership-checked release (Redis) |
//! | `rpm+pgsql:`  | advisory lock (PostgreSQL)                           |
//!
//! Whichever backend is configured, at most one caller holds the lock for a
//! given resource name at any time.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use ipc_mutex::Mutex;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut mutex = Mutex::new("rpm+consul://localhost:8500/my-resource?ttl=15")?;
//!     mutex.open().await?;
//!
//!     mutex.acquire().await?;
//!     // critical section: we are the only holder of "my-resource"
//!     mutex.release().await?;
//!
//!     mutex.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Crate organization
//!
//! This facade crate re-exports the core types and one crate per backend:
//! `ipc-mutex-core`, `ipc-mutex-spm`, `ipc-mutex-mpm`, `ipc-mutex-consul`,
//! `ipc-mutex-redis`, `ipc-mutex-postgres`. Depend on individual crates
//! instead for fine-grained control (for example to wire cluster workers or
//! substitute a custom session store).

use std::time::Duration;

pub use ipc_mutex_core::{
    ConnectionDescriptor, Lifecycle, LockStrategy, MutexError, MutexResult, StrategyKind,
};

pub use ipc_mutex_consul::{ConsulMutex, HttpSessionStore, KeyState, SessionConfig, SessionStore};
pub use ipc_mutex_mpm::{ClusterHub, LocalChannel, MpmMutex};
pub use ipc_mutex_postgres::PostgresMutex;
pub use ipc_mutex_redis::RedisMutex;
pub use ipc_mutex_spm::SpmMutex;

/// One strategy per backend, selected once at construction.
enum Strategy {
    Spm(SpmMutex),
    Mpm(MpmMutex),
    Consul(ConsulMutex),
    Redis(RedisMutex),
    Postgres(PostgresMutex),
}

macro_rules! forward {
    ($self:ident, $strategy:ident => $call:expr) => {
        match &mut $self.strategy {
            Strategy::Spm($strategy) => $call,
            Strategy::Mpm($strategy) => $call,
            Strategy::Consul($strategy) => $call,
            Strategy::Redis($strategy) => $call,
            Strategy::Postgres($strategy) => $call,
        }
    };
}

/// Caller-facing mutex over one named resource.
///
/// Construction parses the connection identifier exactly once and selects
/// the strategy; all four operations are pure pass-through to it. The facade
/// holds no locking logic and performs no duplicate validation.
pub struct Mutex {
    descriptor: ConnectionDescriptor,
    strategy: Strategy,
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl Mutex {
    /// Creates a mutex from a connection identifier. Performs no I/O.
    ///
    /// Fails with a configuration error if the scheme does not resolve to a
    /// registered strategy or the identifier is structurally invalid; no
    /// backend resources are created on failure.
    pub fn new(url: &str) -> MutexResult<Self> {
        let descriptor = ConnectionDescriptor::parse(url)?;
        let strategy = match descriptor.kind {
            StrategyKind::SingleProcess => Strategy::Spm(SpmMutex::new(&descriptor)),
            StrategyKind::MultiProcess => Strategy::Mpm(MpmMutex::primary(&descriptor)),
            StrategyKind::Consul => Strategy::Consul(ConsulMutex::new(&descriptor)),
            StrategyKind::Redis => Strategy::Redis(RedisMutex::new(&descriptor)),
            StrategyKind::Postgres => Strategy::Postgres(PostgresMutex::new(&descriptor)),
        };
        Ok(Self {
            descriptor,
            strategy,
        })
    }

    /// Creates a cluster-worker mutex forwarding to a primary over `channel`.
    ///
    /// Only meaningful for `mpm://` identifiers; the cluster role is an
    /// explicit input here rather than ambient process state.
    pub fn mpm_worker(url: &str, channel: LocalChannel) -> MutexResult<Self> {
        let descriptor = ConnectionDescriptor::parse(url)?;
        if descriptor.kind != StrategyKind::MultiProcess {
            return Err(MutexError::InvalidUrl(
                "worker role requires an mpm:// identifier".to_string(),
            ));
        }
        Ok(Self {
            strategy: Strategy::Mpm(MpmMutex::worker(&descriptor, channel)),
            descriptor,
        })
    }

    /// The parsed connection descriptor.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// For an `mpm://` primary: channel to hand to workers. Available once
    /// open.
    pub fn mpm_channel(&self) -> MutexResult<&LocalChannel> {
        match &self.strategy {
            Strategy::Mpm(mpm) => mpm.channel(),
            _ => Err(MutexError::InvalidUrl(
                "not an mpm:// mutex".to_string(),
            )),
        }
    }

    /// Establishes the backend connection and marks the mutex open.
    pub async fn open(&mut self) -> MutexResult<()> {
        forward!(self, s => s.open().await)
    }

    /// Obtains the lock, waiting indefinitely.
    pub async fn acquire(&mut self) -> MutexResult<()> {
        forward!(self, s => s.acquire(None).await)
    }

    /// Obtains the lock, failing with `Timeout` once `limit` expires.
    pub async fn acquire_timeout(&mut self, limit: Duration) -> MutexResult<()> {
        forward!(self, s => s.acquire(Some(limit)).await)
    }

    /// Releases the lock.
    pub async fn release(&mut self) -> MutexResult<()> {
        forward!(self, s => s.release().await)
    }

    /// Releases any held lock and tears down the backend connection.
    pub async fn close(&mut self) -> MutexResult<()> {
        forward!(self, s => s.close().await)
    }
}
