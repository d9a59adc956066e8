//! Message send frames
//!
//! A message arrives here already encoded as a list of byte slices.
//!
//! ## Whole message
//!
//! ```text
//! [ConnectionObjectId: i16][OrderingContextId: i16][TransactionReference]
//! [DestinationType: i16][AlternateUser: string][Destination]
//! [MessageLength: i32][Message bytes]
//! ```
//!
//! ## Chunked message, one frame per slice
//!
//! ```text
//! [ConnectionObjectId: i16][OrderingContextId: i16][TransactionReference]
//! [Flags: u8]  bit 0 = first, bit 1 = last, neither = middle
//! first slice only: [DestinationType: i16][AlternateUser: string][Destination]
//! [SliceLength: i32][Slice bytes]
//! ```
//!
//! ## Destination
//!
//! ```text
//! [Name: string][Bus: string][LocalOnly: u8]
//! ```

use crate::frame::RequestFrame;
use crate::transaction::TransactionReference;
use corelink_core::{CommsError, CommsResult, ConnectionObjectId, OrderingContextId};

/// Slice flag: first slice of a message
pub const CHUNKED_MESSAGE_FIRST: u8 = 0x01;
/// Slice flag: last slice of a message
pub const CHUNKED_MESSAGE_LAST: u8 = 0x02;
/// Slice flag value for a slice that is neither first nor last
pub const CHUNKED_MESSAGE_MIDDLE: u8 = 0x00;

/// Destination type written when the caller gave none
pub const NO_DEST_TYPE: i16 = -1;

/// Flags for slice `index` of a message made of `count` slices
pub fn chunk_flags(index: usize, count: usize) -> u8 {
    let mut flags = CHUNKED_MESSAGE_MIDDLE;
    if index == 0 {
        flags |= CHUNKED_MESSAGE_FIRST;
    }
    if index + 1 == count {
        flags |= CHUNKED_MESSAGE_LAST;
    }
    flags
}

/// Kind of destination a send addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationType {
    /// Point-to-point queue
    Queue,
    /// Publish/subscribe topic space
    TopicSpace,
    /// Service destination
    Service,
    /// Port destination
    Port,
}

impl DestinationType {
    fn code(&self) -> i16 {
        match self {
            DestinationType::Queue => 0,
            DestinationType::TopicSpace => 1,
            DestinationType::Service => 2,
            DestinationType::Port => 3,
        }
    }
}

/// Address of a destination on the bus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationAddress {
    /// Destination name
    pub name: String,
    /// Bus the destination lives on; the connected bus when absent
    pub bus_name: Option<String>,
    /// Only the local messaging engine may be used
    pub local_only: bool,
}

impl DestinationAddress {
    /// Destination on the connected bus
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bus_name: None,
            local_only: false,
        }
    }

    fn encode(&self, frame: &mut RequestFrame) -> CommsResult<()> {
        frame.put_string(&self.name)?;
        frame.put_optional_string(self.bus_name.as_deref())?;
        frame.put_bool(self.local_only);
        Ok(())
    }
}

/// Fields shared by every frame of one send
#[derive(Debug, Clone)]
pub struct SendHeader<'a> {
    /// Connection object the send runs on
    pub connection_object_id: ConnectionObjectId,
    /// Ordering context bound for the send
    pub ordering_context: Option<OrderingContextId>,
    /// Transaction the send runs under
    pub transaction: &'a TransactionReference,
    /// Kind of destination, when known
    pub destination_type: Option<DestinationType>,
    /// User to send as
    pub alternate_user: Option<&'a str>,
    /// Target destination
    pub destination: &'a DestinationAddress,
}

impl SendHeader<'_> {
    fn encode_prefix(&self, frame: &mut RequestFrame) {
        frame.put_i16(self.connection_object_id.0).put_i16(
            self.ordering_context
                .map(|id| id.0)
                .unwrap_or(OrderingContextId::NONE),
        );
        self.transaction.encode(frame);
    }

    fn encode_destination(&self, frame: &mut RequestFrame) -> CommsResult<()> {
        frame.put_i16(self.destination_type.map_or(NO_DEST_TYPE, |t| t.code()));
        frame.put_optional_string(self.alternate_user)?;
        self.destination.encode(frame)
    }
}

/// Total encoded length of a message
pub fn message_length(slices: &[Vec<u8>]) -> usize {
    slices.iter().map(Vec::len).sum()
}

/// Frame carrying a whole message
pub fn encode_whole_message(header: &SendHeader<'_>, slices: &[Vec<u8>]) -> CommsResult<RequestFrame> {
    let mut frame = RequestFrame::new();
    header.encode_prefix(&mut frame);
    header.encode_destination(&mut frame)?;
    let len = i32::try_from(message_length(slices)).map_err(|_| {
        CommsError::IncorrectCall(format!(
            "message of {} bytes is too large to send whole",
            message_length(slices)
        ))
    })?;
    frame.put_i32(len);
    for slice in slices {
        frame.put_bytes(slice);
    }
    Ok(frame)
}

/// Frame carrying slice `index` of a message made of `count` slices
pub fn encode_chunk(
    header: &SendHeader<'_>,
    index: usize,
    count: usize,
    slice: &[u8],
) -> CommsResult<RequestFrame> {
    let flags = chunk_flags(index, count);
    let mut frame = RequestFrame::new();
    header.encode_prefix(&mut frame);
    frame.put_u8(flags);
    if flags & CHUNKED_MESSAGE_FIRST != 0 {
        header.encode_destination(&mut frame)?;
    }
    frame.put_slice(slice)?;
    Ok(frame)
}
