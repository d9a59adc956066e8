//! Wire codec for corelink
//!
//! This crate defines how the proxy layer talks to the messaging engine:
//! - Segment: Operation tag carried by every frame
//! - RequestFrame / ReplyFrame: Big-endian field builder and reader
//! - Exception chains: Decoding of remote failures into `CommsError`
//! - XA, control and message frame layouts
//! - Conversation: The transport seam, plus a recording implementation for tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod conversation;
pub mod exception;
pub mod frame;
pub mod message;
pub mod segment;
pub mod testing;
pub mod transaction;
pub mod xa;

pub use conversation::{Attachment, Conversation, HandshakeProperties, ThrottlingPolicy};
pub use exception::RemoteException;
pub use frame::{ReplyFrame, RequestFrame, SI_NO_EXCEPTION};
pub use message::{DestinationAddress, DestinationType, SendHeader};
pub use segment::Segment;
pub use transaction::{OptimizedReference, TransactionReference};
pub use xa::XaFrameEncoder;
