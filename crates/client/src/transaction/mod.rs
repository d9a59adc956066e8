//! Transaction proxies
//!
//! Three flavours share one [`TransactionCore`]:
//! - `LocalTransaction`: uncoordinated, committed by the application
//! - `XaResourceState`: one XA branch driven by a transaction manager
//! - `SuspendableResource`: façade adding suspend/resume over pooled
//!   `XaResourceState`s
//!
//! The send path only needs [`TransactionOperations`]; a transaction manager
//! drives [`XaResource`].

pub mod common;
pub mod local;
pub mod suspendable;
pub mod xa_resource;

pub use common::TransactionCore;
pub use local::LocalTransaction;
pub use suspendable::SuspendableResource;
pub use xa_resource::{EnlistmentState, XaResourceState};

use corelink_core::{CommsResult, Priority, TransactionId, TransactionKind, Xid, XaResult};
use corelink_wire::TransactionReference;
use std::any::Any;
use std::sync::Arc;

/// What a message flow needs from the transaction it runs under
pub trait TransactionOperations: Send + Sync {
    /// Flavour of proxy
    fn kind(&self) -> TransactionKind;

    /// Link-unique id of the proxy currently carrying the work
    fn transaction_id(&self) -> CommsResult<TransactionId>;

    /// True while work may still be enlisted
    fn is_valid(&self) -> bool;

    /// Reference to write into the next flow
    ///
    /// For optimized transactions the first call after creation carries the
    /// create bit.
    fn reference(&self) -> CommsResult<TransactionReference>;

    /// Note that a message was sent at `priority`
    fn record_message_priority(&self, priority: Priority);

    /// True if consumers should register for rollback notification
    fn strict_redelivery_ordering(&self) -> bool;

    /// Register `consumer` to be told if the transaction rolls back
    fn register_redelivery_consumer(&self, consumer: Arc<dyn RedeliveryListener>);
}

/// A consumer that must discard read-ahead messages on rollback
pub trait RedeliveryListener: Send + Sync {
    /// The transaction identified by `transaction_id` rolled back
    fn rollback_occurred(&self, transaction_id: TransactionId) -> CommsResult<()>;
}

/// The XA contract seen by a transaction manager
pub trait XaResource: Send + Sync {
    /// Associate the caller's work with `xid`
    fn start(&self, xid: &Xid, flags: i32) -> XaResult<()>;

    /// Dissociate the caller's work from `xid`
    fn end(&self, xid: &Xid, flags: i32) -> XaResult<()>;

    /// Commit `xid`
    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()>;

    /// Prepare `xid`, returning the vote
    fn prepare(&self, xid: &Xid) -> XaResult<i32>;

    /// Roll back `xid`
    fn rollback(&self, xid: &Xid) -> XaResult<()>;

    /// Forget a heuristically completed `xid`
    fn forget(&self, xid: &Xid) -> XaResult<()>;

    /// In-doubt branches known to the resource manager
    fn recover(&self, flags: i32) -> XaResult<Vec<Xid>>;

    /// Current transaction timeout in seconds
    fn transaction_timeout(&self) -> XaResult<i32>;

    /// Set the transaction timeout; false if the resource manager ignored it
    fn set_transaction_timeout(&self, seconds: i32) -> XaResult<bool>;

    /// True if `other` talks to the same messaging engine
    fn is_same_rm(&self, other: &dyn XaResource) -> XaResult<bool>;

    /// For identity comparison across resource types
    fn as_any(&self) -> &dyn Any;
}

/// Creates XA branch proxies for a [`SuspendableResource`]
pub trait XaResourceFactory: Send + Sync {
    /// A fresh, unenlisted resource
    fn create_xa_resource(&self, message_store: bool) -> CommsResult<Arc<XaResourceState>>;
}

/// Messaging engine identity behind `resource`, if it is one of ours
pub(crate) fn resource_identity(resource: &dyn XaResource) -> Option<uuid::Uuid> {
    let any = resource.as_any();
    if let Some(state) = any.downcast_ref::<XaResourceState>() {
        return state.me_uuid();
    }
    if let Some(facade) = any.downcast_ref::<SuspendableResource>() {
        return facade.me_uuid();
    }
    None
}
