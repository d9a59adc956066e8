//! Global transaction identifier
//!
//! An `Xid` is supplied by the transaction manager. The proxy layer only ever
//! compares, hashes and encodes it; it never interprets the byte contents.

use crate::error::{CommsError, CommsResult};
use std::fmt;
use uuid::Uuid;

/// XA transaction identifier (format id, global transaction id, branch qualifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Maximum length of the global transaction id.
    pub const MAXGTRIDSIZE: usize = 64;
    /// Maximum length of the branch qualifier.
    pub const MAXBQUALSIZE: usize = 64;

    /// Create an Xid, rejecting components longer than the XA maxima.
    pub fn new(
        format_id: i32,
        global_transaction_id: &[u8],
        branch_qualifier: &[u8],
    ) -> CommsResult<Self> {
        if global_transaction_id.len() > Self::MAXGTRIDSIZE {
            return Err(CommsError::IncorrectCall(format!(
                "global transaction id is {} bytes, maximum is {}",
                global_transaction_id.len(),
                Self::MAXGTRIDSIZE
            )));
        }
        if branch_qualifier.len() > Self::MAXBQUALSIZE {
            return Err(CommsError::IncorrectCall(format!(
                "branch qualifier is {} bytes, maximum is {}",
                branch_qualifier.len(),
                Self::MAXBQUALSIZE
            )));
        }
        Ok(Self {
            format_id,
            global_transaction_id: global_transaction_id.to_vec(),
            branch_qualifier: branch_qualifier.to_vec(),
        })
    }

    /// Generate a random Xid (format id 0, UUID global id, empty qualifier).
    pub fn generate() -> Self {
        Self {
            format_id: 0,
            global_transaction_id: Uuid::new_v4().as_bytes().to_vec(),
            branch_qualifier: Vec::new(),
        }
    }

    /// Format identifier
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Global transaction identifier bytes
    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    /// Branch qualifier bytes
    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for b in &self.global_transaction_id {
            write!(f, "{:02x}", b)?;
        }
        f.write_str(":")?;
        for b in &self.branch_qualifier {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
