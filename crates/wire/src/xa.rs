//! XA frame layouts
//!
//! ```text
//! open            [ConnectionObjectId: i16][TransactionId: i32]
//! start, end      [TransactionId: i32][Xid][Flags: i32][ResourceKind: u8]?
//! commit          [TransactionId: i32][Xid][OnePhase: u8][ResourceKind: u8]?
//! prepare         [TransactionId: i32][Xid][ResourceKind: u8]?
//! rollback        [TransactionId: i32][Xid][ResourceKind: u8]?
//! forget          [TransactionId: i32][Xid][ResourceKind: u8]?
//! recover         [TransactionId: i32][Flags: i32][ResourceKind: u8]?
//! get timeout     [TransactionId: i32][ResourceKind: u8]?
//! set timeout     [TransactionId: i32][Timeout: i32][ResourceKind: u8]?
//! ```
//!
//! The ResourceKind byte (1 = message-store resource) is present only when the
//! negotiated protocol level is at least [`FapLevel::VERSION_5`].
//!
//! Reply payloads: prepare returns the vote (`i32`), recover returns
//! `[Count: i16]` followed by that many Xids, get timeout returns `i32`, set
//! timeout returns a boolean byte.

use crate::frame::{ReplyFrame, RequestFrame};
use corelink_core::{ConnectionObjectId, CommsResult, FapLevel, TransactionId, Xid};

/// Builds XA request frames for one resource proxy
#[derive(Debug, Clone, Copy)]
pub struct XaFrameEncoder {
    transaction_id: TransactionId,
    fap_level: FapLevel,
    message_store: bool,
}

impl XaFrameEncoder {
    /// Encoder for the proxy identified by `transaction_id`
    pub fn new(transaction_id: TransactionId, fap_level: FapLevel, message_store: bool) -> Self {
        Self {
            transaction_id,
            fap_level,
            message_store,
        }
    }

    /// Transaction id written into every frame
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// XA open
    pub fn open(&self, connection_object_id: ConnectionObjectId) -> RequestFrame {
        let mut frame = RequestFrame::new();
        frame
            .put_i16(connection_object_id.0)
            .put_i32(self.transaction_id.0);
        frame
    }

    /// XA start
    pub fn start(&self, xid: &Xid, flags: i32) -> RequestFrame {
        self.with_xid_and_flags(xid, flags)
    }

    /// XA end
    pub fn end(&self, xid: &Xid, flags: i32) -> RequestFrame {
        self.with_xid_and_flags(xid, flags)
    }

    /// XA commit
    pub fn commit(&self, xid: &Xid, one_phase: bool) -> RequestFrame {
        let mut frame = self.header();
        frame.put_xid(xid).put_bool(one_phase);
        self.finish(frame)
    }

    /// XA prepare
    pub fn prepare(&self, xid: &Xid) -> RequestFrame {
        self.with_xid(xid)
    }

    /// XA rollback
    pub fn rollback(&self, xid: &Xid) -> RequestFrame {
        self.with_xid(xid)
    }

    /// XA forget
    pub fn forget(&self, xid: &Xid) -> RequestFrame {
        self.with_xid(xid)
    }

    /// XA recover
    pub fn recover(&self, flags: i32) -> RequestFrame {
        let mut frame = self.header();
        frame.put_i32(flags);
        self.finish(frame)
    }

    /// Read the transaction timeout
    pub fn get_transaction_timeout(&self) -> RequestFrame {
        self.finish(self.header())
    }

    /// Set the transaction timeout
    pub fn set_transaction_timeout(&self, seconds: i32) -> RequestFrame {
        let mut frame = self.header();
        frame.put_i32(seconds);
        self.finish(frame)
    }

    fn header(&self) -> RequestFrame {
        let mut frame = RequestFrame::new();
        frame.put_i32(self.transaction_id.0);
        frame
    }

    fn with_xid(&self, xid: &Xid) -> RequestFrame {
        let mut frame = self.header();
        frame.put_xid(xid);
        self.finish(frame)
    }

    fn with_xid_and_flags(&self, xid: &Xid, flags: i32) -> RequestFrame {
        let mut frame = self.header();
        frame.put_xid(xid).put_i32(flags);
        self.finish(frame)
    }

    fn finish(&self, mut frame: RequestFrame) -> RequestFrame {
        if self.fap_level.at_least(FapLevel::VERSION_5) {
            frame.put_bool(self.message_store);
        }
        frame
    }
}

/// Decode the vote returned by prepare
pub fn decode_prepare_vote(reply: &mut ReplyFrame) -> CommsResult<i32> {
    reply.get_i32()
}

/// Decode the in-doubt Xids returned by recover
pub fn decode_recover(reply: &mut ReplyFrame) -> CommsResult<Vec<Xid>> {
    let count = reply.get_i16()?;
    let mut xids = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        xids.push(reply.get_xid()?);
    }
    Ok(xids)
}

/// Decode the timeout returned by get timeout
pub fn decode_transaction_timeout(reply: &mut ReplyFrame) -> CommsResult<i32> {
    reply.get_i32()
}

/// Decode whether set timeout was accepted
pub fn decode_set_transaction_timeout(reply: &mut ReplyFrame) -> CommsResult<bool> {
    reply.get_bool()
}
