//! Convenience prelude for strategy implementations.

pub use crate::descriptor::{ConnectionDescriptor, StrategyKind, TlsMaterial};
pub use crate::error::{BoxError, MutexError, MutexResult};
pub use crate::lifecycle::Lifecycle;
pub use crate::traits::LockStrategy;
