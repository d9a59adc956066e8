//! Segment types
//!
//! Every frame exchanged with the messaging engine is tagged with a segment
//! type naming the operation. Replies are tagged with the segment of the
//! request they answer.

use std::fmt;

/// Operation carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Open an XA resource on the peer
    XaOpen,
    /// XA start
    XaStart,
    /// XA end
    XaEnd,
    /// XA commit
    XaCommit,
    /// XA prepare
    XaPrepare,
    /// XA rollback
    XaRollback,
    /// XA forget
    XaForget,
    /// XA recover
    XaRecover,
    /// Read the XA transaction timeout
    XaGetTxTimeout,
    /// Set the XA transaction timeout
    XaSetTxTimeout,
    /// Create an uncoordinated (local) transaction
    CreateUncoordinatedTransaction,
    /// Commit an uncoordinated transaction
    CommitTransaction,
    /// Roll back an uncoordinated transaction
    RollbackTransaction,
    /// Allocate an ordering context on the peer
    CreateOrderingContext,
    /// Whole message send expecting a reply
    SendConnMessage,
    /// Whole message send without reply
    SendConnMessageNoReply,
    /// Final slice of a chunked send expecting a reply
    SendChunkedConnMessage,
    /// Slice of a chunked send without reply
    SendChunkedConnMessageNoReply,
    /// Close the connection object
    CloseConnection,
}

impl Segment {
    /// Numeric segment code written in the transport header
    pub fn code(&self) -> u8 {
        match self {
            Segment::XaOpen => 0x2B,
            Segment::XaStart => 0x2C,
            Segment::XaEnd => 0x2D,
            Segment::XaCommit => 0x2E,
            Segment::XaPrepare => 0x2F,
            Segment::XaRollback => 0x30,
            Segment::XaForget => 0x31,
            Segment::XaRecover => 0x32,
            Segment::XaGetTxTimeout => 0x33,
            Segment::XaSetTxTimeout => 0x34,
            Segment::CreateUncoordinatedTransaction => 0x25,
            Segment::CommitTransaction => 0x26,
            Segment::RollbackTransaction => 0x27,
            Segment::CreateOrderingContext => 0x48,
            Segment::SendConnMessage => 0x0E,
            Segment::SendConnMessageNoReply => 0x0F,
            Segment::SendChunkedConnMessage => 0x5A,
            Segment::SendChunkedConnMessageNoReply => 0x5B,
            Segment::CloseConnection => 0x04,
        }
    }

    /// Short name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            Segment::XaOpen => "XA_OPEN",
            Segment::XaStart => "XA_START",
            Segment::XaEnd => "XA_END",
            Segment::XaCommit => "XA_COMMIT",
            Segment::XaPrepare => "XA_PREPARE",
            Segment::XaRollback => "XA_ROLLBACK",
            Segment::XaForget => "XA_FORGET",
            Segment::XaRecover => "XA_RECOVER",
            Segment::XaGetTxTimeout => "XA_GETTXTIMEOUT",
            Segment::XaSetTxTimeout => "XA_SETTXTIMEOUT",
            Segment::CreateUncoordinatedTransaction => "CREATE_UCTRANSACTION",
            Segment::CommitTransaction => "COMMIT_TRANSACTION",
            Segment::RollbackTransaction => "ROLLBACK_TRANSACTION",
            Segment::CreateOrderingContext => "CREATE_ORDER_CONTEXT",
            Segment::SendConnMessage => "SEND_CONN_MSG",
            Segment::SendConnMessageNoReply => "SEND_CONN_MSG_NOREPLY",
            Segment::SendChunkedConnMessage => "SEND_CHUNKED_CONN_MSG",
            Segment::SendChunkedConnMessageNoReply => "SEND_CHUNKED_CONN_MSG_NOREPLY",
            Segment::CloseConnection => "CLOSE_CONNECTION",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [Segment; 19] = [
        Segment::XaOpen,
        Segment::XaStart,
        Segment::XaEnd,
        Segment::XaCommit,
        Segment::XaPrepare,
        Segment::XaRollback,
        Segment::XaForget,
        Segment::XaRecover,
        Segment::XaGetTxTimeout,
        Segment::XaSetTxTimeout,
        Segment::CreateUncoordinatedTransaction,
        Segment::CommitTransaction,
        Segment::RollbackTransaction,
        Segment::CreateOrderingContext,
        Segment::SendConnMessage,
        Segment::SendConnMessageNoReply,
        Segment::SendChunkedConnMessage,
        Segment::SendChunkedConnMessageNoReply,
        Segment::CloseConnection,
    ];

    #[test]
    fn test_segment_codes_are_unique() {
        let codes: HashSet<u8> = ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn test_display_includes_code() {
        assert_eq!(Segment::XaStart.to_string(), "XA_START (0x2C)");
    }
}
