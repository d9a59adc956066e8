//! Identity-space limits
//!
//! Transaction ids are positive `i32` values; ordering context ids are
//! positive `i16` values. These bounds are part of the wire contract and are
//! deliberately not widened. Exhausting either space fails with
//! `CommsError::LimitExceeded`.

use crate::error::{CommsError, CommsResult};
use crate::types::OrderingContextId;

/// Largest transaction id handed out on a link
pub const MAX_TRANSACTION_ID: i32 = i32::MAX;

/// Smallest valid ordering context id (0 means "no ordering context")
pub const MIN_ORDERING_CONTEXT_ID: i16 = 1;

/// Largest valid ordering context id
pub const MAX_ORDERING_CONTEXT_ID: i16 = i16::MAX;

/// Number of ordering contexts that can be alive at once on one connection
pub const MAX_LIVE_ORDERING_CONTEXTS: usize =
    (MAX_ORDERING_CONTEXT_ID as usize) - (MIN_ORDERING_CONTEXT_ID as usize) + 1;

/// Validate an ordering context id received from the peer
pub fn validate_ordering_context_id(raw: i16) -> CommsResult<OrderingContextId> {
    if raw < MIN_ORDERING_CONTEXT_ID {
        return Err(CommsError::Protocol(format!(
            "ordering context id {} is outside {}..={}",
            raw, MIN_ORDERING_CONTEXT_ID, MAX_ORDERING_CONTEXT_ID
        )));
    }
    Ok(OrderingContextId(raw))
}
