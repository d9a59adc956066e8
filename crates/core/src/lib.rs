//! Core types for corelink
//!
//! This crate defines the vocabulary shared by every other crate:
//! - Xid: Global transaction identifier supplied by a transaction manager
//! - XA flags, vote codes and error codes (`xa`)
//! - TransactionId, OrderingContextId, Priority, Reliability (`types`)
//! - Error: `XaError` for the transaction boundary, `CommsError` for everything else
//! - Limits: Identity-space capacity bounds

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
pub mod error;
pub mod limits;
pub mod types;
pub mod xa;
pub mod xid;

// Re-export commonly used types
pub use error::{CommsError, CommsResult, XaError, XaResult};
pub use limits::{MAX_ORDERING_CONTEXT_ID, MAX_TRANSACTION_ID, MIN_ORDERING_CONTEXT_ID};
pub use types::{
    ConnectionObjectId, FapLevel, OrderingContextId, Priority, Reliability, TransactionId,
    TransactionKind,
};
pub use xid::Xid;
