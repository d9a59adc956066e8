//! Messages as the proxy layer sees them
//!
//! The message encoder lives above this crate; by the time a message reaches
//! a connection it is a list of encoded slices plus the few header values that
//! decide how it is framed.

use corelink_core::Reliability;
use corelink_wire::DestinationType;

/// An encoded message ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message priority, 0-9
    pub priority: u8,
    /// Delivery tier
    pub reliability: Reliability,
    /// Encoded message body, in order
    pub slices: Vec<Vec<u8>>,
    /// Kind of destination, when the sender knows it
    pub destination_type: Option<DestinationType>,
    /// User to send as
    pub alternate_user: Option<String>,
}

impl OutboundMessage {
    /// Message with default priority 4 made of `slices`
    pub fn new(reliability: Reliability, slices: Vec<Vec<u8>>) -> Self {
        Self {
            priority: 4,
            reliability,
            slices,
            destination_type: None,
            alternate_user: None,
        }
    }

    /// Same message at `priority`
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Total encoded length
    pub fn len(&self) -> usize {
        corelink_wire::message::message_length(&self.slices)
    }

    /// True when the body is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message delivered by the messaging engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Engine-assigned handle used to acknowledge or delete the message
    pub handle: u64,
    /// Encoded message body
    pub payload: Vec<u8>,
}

impl ReceivedMessage {
    /// Message with `handle` and `payload`
    pub fn new(handle: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            handle,
            payload: payload.into(),
        }
    }
}
