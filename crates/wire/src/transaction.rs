//! Transaction references carried by message flows
//!
//! ```text
//! none       [0: i32]
//! plain      [TransactionId: i32]
//! optimized  [Flags: i32][CreatingConversationId: i32][TransactionId: i32]
//!            then, for the first reference to a global transaction:
//!            [EndFlags: i32]? (when END_PREVIOUS is set)
//!            [Xid]
//! ```

use crate::frame::RequestFrame;
use corelink_core::{TransactionId, Xid};

/// The flow is transacted (always set for optimized references)
pub const OPTIMIZED_TX_FLAGS_TRANSACTED_BIT: i32 = 0x0000_0001;
/// The transaction is local (uncoordinated)
pub const OPTIMIZED_TX_FLAGS_LOCAL_BIT: i32 = 0x0000_0002;
/// The peer must create the transaction before applying the flow
pub const OPTIMIZED_TX_FLAGS_CREATE_BIT: i32 = 0x0000_0004;
/// The peer must end the previous unit of work first
pub const OPTIMIZED_TX_END_PREVIOUS_BIT: i32 = 0x0000_0008;
/// The created local transaction may enlist subordinate resources
pub const OPTIMIZED_TX_FLAGS_SUBORDINATES_ALLOWED: i32 = 0x0000_0010;

/// How a flow names the transaction it runs under
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionReference {
    /// Not transacted
    None,
    /// Transaction created by an explicit flow
    Plain(TransactionId),
    /// Transaction created lazily by the peer
    Optimized(OptimizedReference),
}

/// Reference to an optimized transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedReference {
    /// Local (uncoordinated) rather than global
    pub local: bool,
    /// First reference: the peer creates the transaction
    pub create: bool,
    /// Local transaction allows subordinate resources
    pub subordinates_allowed: bool,
    /// Conversation that created the transaction proxy
    pub creating_conversation_id: i32,
    /// Link-local transaction id
    pub transaction_id: TransactionId,
    /// Xid of the global unit of work, sent with the create reference
    pub xid: Option<Xid>,
    /// End flags of a previous unit of work the peer must end first
    pub end_previous: Option<i32>,
}

impl OptimizedReference {
    /// Flags word for this reference
    pub fn flags(&self) -> i32 {
        let mut flags = OPTIMIZED_TX_FLAGS_TRANSACTED_BIT;
        if self.local {
            flags |= OPTIMIZED_TX_FLAGS_LOCAL_BIT;
        }
        if self.create {
            flags |= OPTIMIZED_TX_FLAGS_CREATE_BIT;
            if self.local && self.subordinates_allowed {
                flags |= OPTIMIZED_TX_FLAGS_SUBORDINATES_ALLOWED;
            }
        }
        if self.global_create() && self.end_previous.is_some() {
            flags |= OPTIMIZED_TX_END_PREVIOUS_BIT;
        }
        flags
    }

    fn global_create(&self) -> bool {
        self.create && !self.local && self.xid.is_some()
    }
}

impl TransactionReference {
    /// Append this reference to `frame`
    pub fn encode(&self, frame: &mut RequestFrame) {
        match self {
            TransactionReference::None => {
                frame.put_i32(0);
            }
            TransactionReference::Plain(id) => {
                frame.put_i32(id.0);
            }
            TransactionReference::Optimized(opt) => {
                frame
                    .put_i32(opt.flags())
                    .put_i32(opt.creating_conversation_id)
                    .put_i32(opt.transaction_id.0);
                if opt.global_create() {
                    if let Some(end_flags) = opt.end_previous {
                        frame.put_i32(end_flags);
                    }
                    if let Some(xid) = &opt.xid {
                        frame.put_xid(xid);
                    }
                }
            }
        }
    }

    /// Transaction id named by the reference, if any
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            TransactionReference::None => None,
            TransactionReference::Plain(id) => Some(*id),
            TransactionReference::Optimized(opt) => Some(opt.transaction_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimized(local: bool, create: bool) -> OptimizedReference {
        OptimizedReference {
            local,
            create,
            subordinates_allowed: true,
            creating_conversation_id: 9,
            transaction_id: TransactionId(4),
            xid: None,
            end_previous: None,
        }
    }

    #[test]
    fn test_none_and_plain() {
        let mut frame = RequestFrame::new();
        TransactionReference::None.encode(&mut frame);
        TransactionReference::Plain(TransactionId(0x0102_0304)).encode(&mut frame);
        assert_eq!(frame.as_bytes(), &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_local_create_flags() {
        let opt = optimized(true, true);
        assert_eq!(
            opt.flags(),
            OPTIMIZED_TX_FLAGS_TRANSACTED_BIT
                | OPTIMIZED_TX_FLAGS_LOCAL_BIT
                | OPTIMIZED_TX_FLAGS_CREATE_BIT
                | OPTIMIZED_TX_FLAGS_SUBORDINATES_ALLOWED
        );

        // Subordinates flag only travels with the create
        let later = optimized(true, false);
        assert_eq!(
            later.flags(),
            OPTIMIZED_TX_FLAGS_TRANSACTED_BIT | OPTIMIZED_TX_FLAGS_LOCAL_BIT
        );
    }

    #[test]
    fn test_global_create_carries_xid() {
        let xid = Xid::new(1, &[0xAB], &[]).unwrap();
        let opt = OptimizedReference {
            xid: Some(xid),
            end_previous: Some(0x0400_0000),
            ..optimized(false, true)
        };
        let mut frame = RequestFrame::new();
        TransactionReference::Optimized(opt).encode(&mut frame);

        let flags = OPTIMIZED_TX_FLAGS_TRANSACTED_BIT
            | OPTIMIZED_TX_FLAGS_CREATE_BIT
            | OPTIMIZED_TX_END_PREVIOUS_BIT;
        let mut expected = flags.to_be_bytes().to_vec();
        expected.extend_from_slice(&[0, 0, 0, 9, 0, 0, 0, 4]);
        expected.extend_from_slice(&[0x04, 0, 0, 0]);
        expected.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 0xAB, 0, 0, 0, 0]);
        assert_eq!(frame.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_global_reference_after_create_has_no_xid() {
        let opt = OptimizedReference {
            xid: Some(Xid::generate()),
            ..optimized(false, false)
        };
        let mut frame = RequestFrame::new();
        TransactionReference::Optimized(opt).encode(&mut frame);
        assert_eq!(frame.len(), 12);
    }
}
