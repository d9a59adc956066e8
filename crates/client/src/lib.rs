//! Client proxy layer for corelink
//!
//! This crate turns a [`Conversation`](corelink_wire::Conversation) into the
//! objects an application works with:
//! - Connection: Sends, factories, listeners, close
//! - LocalTransaction: Uncoordinated transactions
//! - XaResourceState / SuspendableResource: XA branch proxies with join and
//!   suspend/resume
//! - OrderingContext: Use-counted ordering context handles
//! - ReadAheadConsumer: Consumer buffer purged on rollback
//! - ClientConfig: `corelink.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod config;
pub mod connection;
pub mod consumer;
mod context;
pub mod conversation_state;
pub mod link;
pub mod message;
pub mod ordering;
pub mod transaction;

pub use callbacks::{CallbackDispatcher, ConnectionListener, ListenerResult, MessageListener};
pub use config::{ClientConfig, CONFIG_FILE_NAME};
pub use connection::Connection;
pub use consumer::ReadAheadConsumer;
pub use conversation_state::{ClientConversationState, OrderingContextPool};
pub use link::{ClientLinkLevelState, LinkXidMap, TransactionIdAllocator};
pub use message::{OutboundMessage, ReceivedMessage};
pub use ordering::{OrderingBinding, OrderingContext};
pub use transaction::{
    EnlistmentState, LocalTransaction, RedeliveryListener, SuspendableResource, TransactionCore,
    TransactionOperations, XaResource, XaResourceFactory, XaResourceState,
};
