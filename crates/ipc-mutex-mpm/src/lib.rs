//! Process-cluster strategy for ipc-mutex.
//!
//! One caller in the cluster (the primary) owns the actual in-memory mutex
//! state in a [`ClusterHub`]; every other caller (a worker) forwards its
//! acquire/release calls to the hub over a call channel and blocks on the
//! reply. The hub serializes grants per resource name, so at most one caller
//! in the cluster holds a given lock at any time.
//!
//! The wire transport between processes is an external collaborator; this
//! crate ships [`LocalChannel`], an in-process request/reply channel, which
//! both serves as the primary's own path to its hub and lets embedders wire
//! workers to the primary within one process tree.

pub mod channel;
pub mod hub;
pub mod mutex;

pub use channel::{ClusterReply, ClusterRequest, LocalChannel};
pub use hub::ClusterHub;
pub use mutex::MpmMutex;
