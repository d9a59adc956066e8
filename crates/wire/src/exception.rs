//! Remote exception chains
//!
//! ## Layout (after a non-zero completion status)
//!
//! ```text
//! [Count: i16]
//! For each exception (outermost first):
//!   [Id: i16]
//!   [ItemCount: i16]
//!   For each item:
//!     [DataId: i16]
//!     DataId 1 (probe id): [string]
//!     DataId 2 (message):  [string]
//!     DataId 3 (reason):   [Len: i16 = 4][Reason: i32]
//! ```
//!
//! Only the outermost exception becomes the returned error. Inner exceptions
//! are logged at debug level.

use crate::frame::{ReplyFrame, RequestFrame};
use crate::segment::Segment;
use corelink_core::{CommsError, CommsResult, XaError};
use tracing::debug;

/// Generic remote exception
pub const SI_EXCEPTION: i16 = 0x0001;
/// Incorrect call
pub const SI_INCORRECT_CALL_EXCEPTION: i16 = 0x0002;
/// Not possible in current configuration
pub const SI_NOT_POSSIBLE_IN_CUR_CONFIG_EXCEPTION: i16 = 0x0008;
/// Not authorised
pub const SI_NOT_AUTHORISED_EXCEPTION: i16 = 0x0009;
/// Session unavailable
pub const SI_SESSION_UNAVAILABLE_EXCEPTION: i16 = 0x000A;
/// Session dropped
pub const SI_SESSION_DROPPED_EXCEPTION: i16 = 0x000B;
/// Connection unavailable
pub const SI_CONNECTION_UNAVAILABLE_EXCEPTION: i16 = 0x000F;
/// Connection dropped
pub const SI_CONNECTION_DROPPED_EXCEPTION: i16 = 0x0010;
/// Temporary destination not found
pub const SI_TEMPORARY_DEST_NOT_FOUND_EXCEPTION: i16 = 0x0014;
/// Resource failure
pub const SI_RESOURCE_EXCEPTION: i16 = 0x0016;
/// Limit exceeded
pub const SI_LIMIT_EXCEEDED_EXCEPTION: i16 = 0x0017;
/// Connection lost
pub const SI_CONNECTION_LOST_EXCEPTION: i16 = 0x0018;
/// Rollback
pub const SI_ROLLBACK_EXCEPTION: i16 = 0x0019;
/// Internal engine error
pub const SI_ERROR_EXCEPTION: i16 = 0x001D;
/// Internal error in the comms layer
pub const EXCEPTION_INTERNAL_ERROR: i16 = 0x0100;
/// XA exception; the reason item carries the XA error code
pub const EXCEPTION_XAEXCEPTION: i16 = 0x0101;

/// Data item carrying the probe id
pub const DATAID_EXCEPTION_PROBEID: i16 = 0x0001;
/// Data item carrying the message text
pub const DATAID_EXCEPTION_MESSAGE: i16 = 0x0002;
/// Data item carrying the reason code
pub const DATAID_EXCEPTION_REASON: i16 = 0x0003;

/// One exception of a chain, as sent by the peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteException {
    /// Exception id
    pub id: i16,
    /// Message text
    pub message: String,
    /// Probe id of the failure site, when the peer recorded one
    pub probe_id: Option<String>,
    /// Reason code; the XA error code for [`EXCEPTION_XAEXCEPTION`]
    pub reason: i32,
}

impl RemoteException {
    /// Exception with a message and no probe id or reason
    pub fn new(id: i16, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            probe_id: None,
            reason: 0,
        }
    }

    /// XA exception carrying `xa_code`
    pub fn xa(xa_code: i32, message: impl Into<String>) -> Self {
        Self {
            id: EXCEPTION_XAEXCEPTION,
            message: message.into(),
            probe_id: None,
            reason: xa_code,
        }
    }

    /// Message with the probe id appended when present
    fn full_message(&self) -> String {
        match &self.probe_id {
            Some(probe) => format!("{} (probe {})", self.message, probe),
            None => self.message.clone(),
        }
    }

    /// Map onto the client error hierarchy
    pub fn into_error(self) -> CommsError {
        let message = self.full_message();
        match self.id {
            EXCEPTION_XAEXCEPTION => CommsError::Xa(XaError::from_remote(self.reason, message)),
            SI_INCORRECT_CALL_EXCEPTION => CommsError::IncorrectCall(message),
            SI_NOT_POSSIBLE_IN_CUR_CONFIG_EXCEPTION => {
                CommsError::NotPossibleInCurrentConfiguration(message)
            }
            SI_NOT_AUTHORISED_EXCEPTION => CommsError::NotAuthorized(message),
            SI_SESSION_UNAVAILABLE_EXCEPTION | SI_CONNECTION_UNAVAILABLE_EXCEPTION => {
                CommsError::ConnectionUnavailable(message)
            }
            SI_SESSION_DROPPED_EXCEPTION | SI_CONNECTION_DROPPED_EXCEPTION => {
                CommsError::ConnectionDropped(message)
            }
            SI_TEMPORARY_DEST_NOT_FOUND_EXCEPTION => {
                CommsError::TemporaryDestinationNotFound(message)
            }
            SI_RESOURCE_EXCEPTION => CommsError::Resource(message),
            SI_LIMIT_EXCEEDED_EXCEPTION => CommsError::LimitExceeded(message),
            SI_CONNECTION_LOST_EXCEPTION => CommsError::ConnectionLost(message),
            SI_ROLLBACK_EXCEPTION => CommsError::Rollback(message),
            SI_ERROR_EXCEPTION | EXCEPTION_INTERNAL_ERROR => CommsError::CoreError(message),
            code => CommsError::Remote { code, message },
        }
    }

    fn encode(&self, frame: &mut RequestFrame) -> CommsResult<()> {
        let items = 2 + i16::from(self.probe_id.is_some());
        frame.put_i16(self.id).put_i16(items);
        if let Some(probe) = &self.probe_id {
            frame.put_i16(DATAID_EXCEPTION_PROBEID).put_string(probe)?;
        }
        frame.put_i16(DATAID_EXCEPTION_MESSAGE).put_string(&self.message)?;
        frame
            .put_i16(DATAID_EXCEPTION_REASON)
            .put_i16(4)
            .put_i32(self.reason);
        Ok(())
    }
}

/// Build the reply a peer sends when `chain` was raised handling `segment`
pub fn exception_reply(segment: Segment, chain: &[RemoteException]) -> CommsResult<ReplyFrame> {
    let first = chain.first().ok_or_else(|| {
        CommsError::IncorrectCall("an exception reply needs at least one exception".to_string())
    })?;
    let count = i16::try_from(chain.len())
        .map_err(|_| CommsError::IncorrectCall("exception chain too long".to_string()))?;
    let mut frame = RequestFrame::new();
    frame.put_i16(first.id).put_i16(count);
    for exception in chain {
        exception.encode(&mut frame)?;
    }
    Ok(ReplyFrame::new(segment, frame.into_bytes()))
}

/// Decode the exception chain that follows a non-zero completion `status`
///
/// A chain that cannot be decoded still yields an error: a protocol error
/// naming the status.
pub fn decode_exception_chain(reply: &mut ReplyFrame, status: i16) -> CommsError {
    match read_chain(reply) {
        Ok(mut chain) if !chain.is_empty() => {
            for inner in chain.iter().skip(1) {
                debug!(
                    id = inner.id,
                    message = %inner.message,
                    "Remote exception cause"
                );
            }
            chain.swap_remove(0).into_error()
        }
        Ok(_) => CommsError::Remote {
            code: status,
            message: "empty exception chain".to_string(),
        },
        Err(e) => CommsError::Protocol(format!(
            "undecodable exception chain for status {}: {}",
            status, e
        )),
    }
}

fn read_chain(reply: &mut ReplyFrame) -> CommsResult<Vec<RemoteException>> {
    let count = reply.get_i16()?;
    let mut chain = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        chain.push(read_one(reply)?);
    }
    Ok(chain)
}

fn read_one(reply: &mut ReplyFrame) -> CommsResult<RemoteException> {
    let mut exception = RemoteException {
        id: reply.get_i16()?,
        ..RemoteException::default()
    };
    let items = reply.get_i16()?;
    for _ in 0..items {
        match reply.get_i16()? {
            DATAID_EXCEPTION_MESSAGE => exception.message = reply.get_string()?,
            DATAID_EXCEPTION_PROBEID => exception.probe_id = Some(reply.get_string()?),
            DATAID_EXCEPTION_REASON => {
                // Length prefix, always 4
                reply.get_i16()?;
                exception.reason = reply.get_i32()?;
            }
            other => {
                return Err(CommsError::Protocol(format!(
                    "unknown exception data id {}",
                    other
                )))
            }
        }
    }
    Ok(exception)
}
