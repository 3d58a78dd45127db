//! Core trait and types for ipc-mutex strategies.

pub mod descriptor;
pub mod error;
pub mod lifecycle;
pub mod prelude;
pub mod traits;

pub use descriptor::{ConnectionDescriptor, StrategyKind, TlsMaterial};
pub use error::{MutexError, MutexResult};
pub use lifecycle::Lifecycle;
pub use traits::LockStrategy;
