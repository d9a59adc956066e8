//! Connection-level control frames
//!
//! ```text
//! create uncoordinated tx  [ConnectionObjectId: i16][TransactionId: i32]
//!                          [AllowSubordinates: u8]? (protocol level >= 5)
//! commit / rollback tx     [ConnectionObjectId: i16][TransactionReference]
//! create ordering context  [ConnectionObjectId: i16] -> [OrderingContextId: i16]
//! close connection         [ConnectionObjectId: i16]
//! ```

use crate::frame::{ReplyFrame, RequestFrame};
use crate::transaction::TransactionReference;
use corelink_core::limits::validate_ordering_context_id;
use corelink_core::{CommsResult, ConnectionObjectId, FapLevel, OrderingContextId, TransactionId};

/// Create an uncoordinated transaction
pub fn encode_create_uncoordinated_transaction(
    connection_object_id: ConnectionObjectId,
    transaction_id: TransactionId,
    fap_level: FapLevel,
    allow_subordinates: bool,
) -> RequestFrame {
    let mut frame = RequestFrame::new();
    frame
        .put_i16(connection_object_id.0)
        .put_i32(transaction_id.0);
    if fap_level.at_least(FapLevel::VERSION_5) {
        frame.put_bool(allow_subordinates);
    }
    frame
}

/// Commit or roll back an uncoordinated transaction
pub fn encode_transaction_completion(
    connection_object_id: ConnectionObjectId,
    transaction: &TransactionReference,
) -> RequestFrame {
    let mut frame = RequestFrame::new();
    frame.put_i16(connection_object_id.0);
    transaction.encode(&mut frame);
    frame
}

/// Ask the peer for a new ordering context
pub fn encode_create_ordering_context(connection_object_id: ConnectionObjectId) -> RequestFrame {
    let mut frame = RequestFrame::new();
    frame.put_i16(connection_object_id.0);
    frame
}

/// Decode and validate the ordering context id the peer allocated
pub fn decode_ordering_context_id(reply: &mut ReplyFrame) -> CommsResult<OrderingContextId> {
    validate_ordering_context_id(reply.get_i16()?)
}

/// Close the connection object
pub fn encode_close_connection(connection_object_id: ConnectionObjectId) -> RequestFrame {
    let mut frame = RequestFrame::new();
    frame.put_i16(connection_object_id.0);
    frame
}
