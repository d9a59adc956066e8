//! Conversation abstraction
//!
//! A conversation is one logical request/reply channel multiplexed over a
//! physical link. The transport implements [`Conversation`]; this crate only
//! defines what the proxy layer needs from it.

use crate::frame::{ReplyFrame, RequestFrame};
use crate::segment::Segment;
use corelink_core::{CommsError, CommsResult, ConnectionObjectId, FapLevel, Priority};
use once_cell::sync::OnceCell;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// What to do when the transport's send buffers are full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottlingPolicy {
    /// Block the caller until there is room
    BlockThread,
    /// Queue the frame regardless of buffer occupancy
    DoNotThrottle,
}

/// Properties negotiated when the conversation was established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeProperties {
    /// Negotiated protocol level
    pub fap_level: FapLevel,
    /// Identity of the messaging engine at the other end, when known
    pub me_uuid: Option<Uuid>,
    /// Id of the connection object on the peer
    pub connection_object_id: ConnectionObjectId,
    /// The peer requires transactions to be created lazily by the first
    /// flow that references them
    pub requires_optimized_transactions: bool,
}

impl Default for HandshakeProperties {
    fn default() -> Self {
        Self {
            fap_level: FapLevel::VERSION_9,
            me_uuid: None,
            connection_object_id: ConnectionObjectId(1),
            requires_optimized_transactions: false,
        }
    }
}

/// Slot holding one lazily created, shared value
///
/// The first `get_or_init` wins; every later call observes the same value.
#[derive(Default)]
pub struct Attachment {
    slot: OnceCell<Arc<dyn Any + Send + Sync>>,
}

impl Attachment {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the attached value, creating it with `init` if the slot is empty
    ///
    /// Fails if the slot already holds a value of another type.
    pub fn get_or_init<T, F>(&self, init: F) -> CommsResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let value = self
            .slot
            .get_or_init(|| Arc::new(init()) as Arc<dyn Any + Send + Sync>);
        Arc::clone(value).downcast::<T>().map_err(|_| {
            CommsError::Protocol(format!(
                "attachment does not hold a {}",
                type_name::<T>()
            ))
        })
    }

    /// Return the attached value if one of type `T` is present
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.slot
            .get()
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("initialized", &self.slot.get().is_some())
            .finish()
    }
}

/// A request/reply channel to the messaging engine
pub trait Conversation: Send + Sync {
    /// Send `request` and block until the reply arrives or the link fails
    fn exchange(
        &self,
        request: RequestFrame,
        segment: Segment,
        priority: Priority,
        exclusive: bool,
    ) -> CommsResult<ReplyFrame>;

    /// Send `request` without waiting for a reply
    fn send(
        &self,
        request: RequestFrame,
        segment: Segment,
        priority: Priority,
        exclusive: bool,
        throttle: ThrottlingPolicy,
    ) -> CommsResult<()>;

    /// Properties negotiated for this conversation
    fn handshake(&self) -> &HandshakeProperties;

    /// Id of this conversation on its link
    fn conversation_id(&self) -> i32;

    /// Slot shared by every conversation on the same physical link
    fn link_attachment(&self) -> &Attachment;

    /// Slot private to this conversation
    fn conversation_attachment(&self) -> &Attachment;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_attachment_initialised_once() {
        let slot = Attachment::new();
        let calls = AtomicUsize::new(0);

        let a = slot
            .get_or_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                42u32
            })
            .unwrap();
        let b = slot
            .get_or_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                7u32
            })
            .unwrap();

        assert_eq!(*a, 42);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attachment_type_mismatch() {
        let slot = Attachment::new();
        slot.get_or_init(|| String::from("link")).unwrap();
        assert!(matches!(
            slot.get_or_init(|| 1u8),
            Err(CommsError::Protocol(_))
        ));
        assert!(slot.get::<u8>().is_none());
        assert_eq!(slot.get::<String>().unwrap().as_str(), "link");
    }
}
