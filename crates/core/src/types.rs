//! Identifier and classification types
//!
//! This module defines the small value types that flow through every frame:
//! - TransactionId: Link-local id naming a transaction proxy to the peer
//! - OrderingContextId: 16-bit ordering context identity
//! - ConnectionObjectId: Peer-assigned id of the connection object
//! - Priority: Wire priority class of a frame
//! - Reliability: Delivery tier of a message
//! - TransactionKind: Which flavour of transaction proxy is in use

use serde::{Deserialize, Serialize};
use std::fmt;

/// Link-local identifier of a transaction proxy
///
/// Sent on the wire instead of the Xid. Unique among the proxies that are
/// concurrently alive on one physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub i32);

impl TransactionId {
    /// Raw wire value
    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// 16-bit identity of an ordering context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderingContextId(pub i16);

impl OrderingContextId {
    /// Wire value sent when a frame carries no ordering context
    pub const NONE: i16 = 0;

    /// Raw wire value
    pub fn as_i16(&self) -> i16 {
        self.0
    }
}

impl fmt::Display for OrderingContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oc#{}", self.0)
    }
}

/// Id the peer assigned to the connection object during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionObjectId(pub i16);

/// Negotiated protocol level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FapLevel(pub u16);

impl FapLevel {
    /// First level that carries the message-store resource byte on XA frames
    /// and the allow-subordinates byte on local transaction creation.
    pub const VERSION_5: FapLevel = FapLevel(5);
    /// Level at which destination listeners and browser flags appeared
    pub const VERSION_9: FapLevel = FapLevel(9);

    /// True when this level is at least `other`
    pub fn at_least(&self, other: FapLevel) -> bool {
        *self >= other
    }
}

/// Wire priority class of a frame
///
/// The transport keeps frames of one priority in FIFO order. Message
/// priorities 0-9 map onto classes 2..=11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    /// Lowest class
    pub const LOWEST: Priority = Priority(0);
    /// Low class
    pub const LOW: Priority = Priority(1);
    /// Class used for XA control flows and most request/reply exchanges
    pub const MEDIUM: Priority = Priority(7);
    /// Class used for transaction creation
    pub const HIGH: Priority = Priority(12);
    /// Highest class
    pub const HIGHEST: Priority = Priority(15);

    const MESSAGE_PRIORITY_OFFSET: u8 = 2;
    const MAX_MESSAGE_PRIORITY: u8 = 9;

    /// Map a message priority (0-9, clamped) to its wire class
    pub fn from_message_priority(message_priority: u8) -> Priority {
        Priority(message_priority.min(Self::MAX_MESSAGE_PRIORITY) + Self::MESSAGE_PRIORITY_OFFSET)
    }

    /// Raw wire value
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Delivery tier declared by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Reliability {
    /// Non-persistent, may be discarded under load
    BestEffortNonPersistent,
    /// Non-persistent, not acknowledged
    ExpressNonPersistent,
    /// Non-persistent, acknowledged
    ReliableNonPersistent,
    /// Persistent, acknowledged
    ReliablePersistent,
    /// Persistent, assured once-only delivery
    AssuredPersistent,
}

impl Reliability {
    /// Whether the final frame of a send must be an exchange
    pub fn requires_reply(&self) -> bool {
        !matches!(
            self,
            Reliability::BestEffortNonPersistent | Reliability::ExpressNonPersistent
        )
    }
}

/// Flavour of a transaction proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// The peer-side transaction is created by an explicit flow
    Plain,
    /// The peer-side transaction is created by the first flow that references it
    Optimized,
    /// XA façade that hides suspend/resume from the peer
    Suspendable,
}
