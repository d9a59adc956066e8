//! Corelink - client-side proxy layer for a binary messaging-engine protocol
//!
//! Corelink gives an application the objects it works with when talking to a
//! messaging engine over an established conversation: connections, local and
//! XA transactions, and ordering contexts.
//!
//! # Quick Start
//!
//! ```ignore
//! use corelink::{ClientConfig, Connection, OutboundMessage, Reliability, XaResource};
//!
//! let conn = Connection::with_own_pool(conversation, ClientConfig::default())?;
//!
//! // Local transaction
//! let tx = conn.create_uncoordinated_transaction(false)?;
//! conn.send(&OutboundMessage::new(Reliability::ReliablePersistent, slices), Some(&tx), &dest, None)?;
//! tx.commit()?;
//!
//! // XA branch driven by a transaction manager
//! let resource = conn.create_xa_resource(false)?;
//! resource.start(&xid, xa::TMNOFLAGS)?;
//! resource.end(&xid, xa::TMSUCCESS)?;
//! ```
//!
//! # Architecture
//!
//! - `corelink-core`: identifiers, XA constants, errors
//! - `corelink-wire`: frame codec and the `Conversation` transport seam
//! - `corelink-concurrency`: callback synchronizer and dispatch pool
//! - `corelink-client`: the proxies themselves
//!
//! The transport is not part of this crate; callers supply a `Conversation`.

pub use corelink_client::*;
pub use corelink_concurrency::{CallbackGroup, CallbackSynchronizer, DispatchPool};
pub use corelink_core::{
    xa, CommsError, CommsResult, OrderingContextId, Priority, Reliability, TransactionId,
    TransactionKind, XaError, XaResult, Xid,
};
pub use corelink_wire::{Conversation, DestinationAddress, HandshakeProperties, Segment};
