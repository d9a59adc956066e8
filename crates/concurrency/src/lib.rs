//! Concurrency primitives for corelink
//!
//! This crate provides the two pieces of thread coordination the client needs:
//! - CallbackSynchronizer: Two-group mutex keeping message and exception
//!   callbacks apart
//! - DispatchPool: Bounded FIFO worker pool that runs remote-event delivery
//!   off the transport's read path

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod synchronizer;

pub use dispatch::{DispatchError, DispatchPool, DispatchStats};
pub use synchronizer::{CallbackGroup, CallbackGuard, CallbackSynchronizer};
