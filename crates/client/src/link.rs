//! State shared by every conversation on one physical link
//!
//! - `TransactionIdAllocator`: hands out link-unique transaction ids
//! - `LinkXidMap`: Xid -> primary resource, used to resolve TMJOIN
//!
//! Both live in the link attachment and are created the first time any
//! conversation on the link asks for them.

use crate::transaction::XaResourceState;
use corelink_core::limits::MAX_TRANSACTION_ID;
use corelink_core::{CommsError, CommsResult, TransactionId, Xid};
use corelink_wire::Conversation;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Allocator of link-unique transaction ids
///
/// Candidates come from a wrapping counter over `1..=max`. A candidate is
/// checked against the live set and then registered as two separate steps, so
/// two threads racing on the same candidate can both settle on it. Callers
/// that need strict uniqueness under concurrent allocation must serialize
/// their own calls.
pub struct TransactionIdAllocator {
    next: Mutex<i32>,
    live: DashSet<i32>,
    max: i32,
}

impl TransactionIdAllocator {
    /// Allocator over the full positive `i32` range
    pub fn new() -> Self {
        Self::with_max(MAX_TRANSACTION_ID)
    }

    /// Allocator over `1..=max`
    pub fn with_max(max: i32) -> Self {
        Self {
            next: Mutex::new(1),
            live: DashSet::new(),
            max: max.max(1),
        }
    }

    /// Allocate an id not currently in use on this link
    ///
    /// # Errors
    ///
    /// `LimitExceeded` when every id in the range is live.
    pub fn allocate(&self) -> CommsResult<TransactionId> {
        let mut probes: i64 = 0;
        loop {
            let candidate = {
                let mut next = self.next.lock();
                let candidate = *next;
                *next = if candidate >= self.max { 1 } else { candidate + 1 };
                candidate
            };

            if !self.live.contains(&candidate) {
                self.live.insert(candidate);
                return Ok(TransactionId(candidate));
            }

            probes += 1;
            if probes >= i64::from(self.max) {
                return Err(CommsError::LimitExceeded(format!(
                    "all {} transaction ids on this link are in use",
                    self.max
                )));
            }
        }
    }

    /// Return an id to the free range
    pub fn release(&self, id: TransactionId) {
        if self.live.remove(&id.0).is_none() {
            debug!(tx_id = %id, "Released a transaction id that was not live");
        }
    }

    /// Number of ids currently allocated
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// True if `id` is currently allocated
    pub fn is_live(&self, id: TransactionId) -> bool {
        self.live.contains(&id.0)
    }
}

impl Default for TransactionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionIdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionIdAllocator")
            .field("live", &self.live.len())
            .field("max", &self.max)
            .finish()
    }
}

/// Xid -> primary XA resource for every branch started on this link
#[derive(Default)]
pub struct LinkXidMap {
    primaries: DashMap<Xid, Arc<XaResourceState>>,
}

impl LinkXidMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `primary` as the resource that started `xid`
    pub fn register(&self, xid: Xid, primary: Arc<XaResourceState>) {
        if let Some(previous) = self.primaries.insert(xid, primary) {
            debug!(
                tx_id = %previous.transaction_id(),
                "Replaced the primary registered for a branch"
            );
        }
    }

    /// Primary registered for `xid`
    pub fn primary(&self, xid: &Xid) -> Option<Arc<XaResourceState>> {
        self.primaries.get(xid).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `xid` if it is still registered to `primary`
    pub fn remove(&self, xid: &Xid, primary: &XaResourceState) -> bool {
        self.primaries
            .remove_if(xid, |_, registered| std::ptr::eq(registered.as_ref(), primary))
            .is_some()
    }

    /// True if some resource is registered for `xid`
    pub fn contains(&self, xid: &Xid) -> bool {
        self.primaries.contains_key(xid)
    }

    /// Number of registered branches
    pub fn len(&self) -> usize {
        self.primaries.len()
    }

    /// True when no branch is registered
    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty()
    }
}

impl fmt::Debug for LinkXidMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkXidMap")
            .field("branches", &self.primaries.len())
            .finish()
    }
}

/// Per-link client state
#[derive(Debug, Default)]
pub struct ClientLinkLevelState {
    transaction_ids: TransactionIdAllocator,
    xids: LinkXidMap,
}

impl ClientLinkLevelState {
    /// Fresh state with the full transaction id range
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state whose allocator stops at `max_transaction_id`
    pub fn with_max_transaction_id(max_transaction_id: i32) -> Self {
        Self {
            transaction_ids: TransactionIdAllocator::with_max(max_transaction_id),
            xids: LinkXidMap::new(),
        }
    }

    /// State attached to `conversation`'s link, created on first use
    pub fn attached(conversation: &dyn Conversation) -> CommsResult<Arc<Self>> {
        conversation.link_attachment().get_or_init(Self::new)
    }

    /// Transaction id allocator
    pub fn transaction_ids(&self) -> &TransactionIdAllocator {
        &self.transaction_ids
    }

    /// Xid map
    pub fn xids(&self) -> &LinkXidMap {
        &self.xids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelink_wire::testing::RecordingConversation;
    use corelink_wire::HandshakeProperties;

    #[test]
    fn test_allocate_and_release() {
        let ids = TransactionIdAllocator::new();
        let a = ids.allocate().unwrap();
        let b = ids.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(ids.live_count(), 2);

        ids.release(a);
        assert!(!ids.is_live(a));
        assert!(ids.is_live(b));
    }

    #[test]
    fn test_allocation_skips_live_ids_after_wrap() {
        let ids = TransactionIdAllocator::with_max(3);
        let one = ids.allocate().unwrap();
        let two = ids.allocate().unwrap();
        let three = ids.allocate().unwrap();
        assert_eq!((one.0, two.0, three.0), (1, 2, 3));

        ids.release(two);
        assert_eq!(ids.allocate().unwrap(), two);
    }

    #[test]
    fn test_exhaustion_is_limit_exceeded() {
        let ids = TransactionIdAllocator::with_max(2);
        ids.allocate().unwrap();
        ids.allocate().unwrap();
        assert!(matches!(ids.allocate(), Err(CommsError::LimitExceeded(_))));
    }

    #[test]
    fn test_state_is_shared_across_the_link() {
        let first = RecordingConversation::with_defaults();
        let second = first.on_same_link(HandshakeProperties::default());

        let a = ClientLinkLevelState::attached(&first).unwrap();
        let b = ClientLinkLevelState::attached(&second).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other_link = RecordingConversation::with_defaults();
        let c = ClientLinkLevelState::attached(&other_link).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
