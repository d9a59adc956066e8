//! State private to one conversation
//!
//! The only piece today is the ordering context id pool. Ids released by an
//! ordering context go back to the pool and are handed out again before a new
//! id is requested from the peer.

use corelink_core::limits::MAX_LIVE_ORDERING_CONTEXTS;
use corelink_core::{CommsError, CommsResult, OrderingContextId, Priority};
use corelink_wire::control::{decode_ordering_context_id, encode_create_ordering_context};
use corelink_wire::{Conversation, Segment};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<OrderingContextId>,
    live: usize,
}

/// Pool of ordering context ids for one connection
#[derive(Debug)]
pub struct OrderingContextPool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl OrderingContextPool {
    /// Pool limited to the full 16-bit id space
    pub fn new() -> Self {
        Self::with_capacity(MAX_LIVE_ORDERING_CONTEXTS)
    }

    /// Pool refusing more than `capacity` live ids
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            capacity: capacity.min(MAX_LIVE_ORDERING_CONTEXTS),
        }
    }

    /// Take a released id, or ask the peer for a new one
    ///
    /// # Errors
    ///
    /// `LimitExceeded` when `capacity` ids are already live; any failure of the
    /// create exchange; `Protocol` if the peer returns an out-of-range id.
    pub fn acquire(&self, conversation: &dyn Conversation) -> CommsResult<OrderingContextId> {
        {
            let mut state = self.state.lock();
            if state.live >= self.capacity {
                return Err(CommsError::LimitExceeded(format!(
                    "{} ordering contexts are already alive on this connection",
                    state.live
                )));
            }
            state.live += 1;
            if let Some(id) = state.free.pop() {
                debug!(oc_id = %id, "Reusing pooled ordering context id");
                return Ok(id);
            }
        }

        // The slot is reserved; give it back if the peer does not supply an id
        let created = Self::create(conversation);
        if created.is_err() {
            self.state.lock().live -= 1;
        }
        created
    }

    fn create(conversation: &dyn Conversation) -> CommsResult<OrderingContextId> {
        let request = encode_create_ordering_context(conversation.handshake().connection_object_id);
        let mut reply = conversation.exchange(
            request,
            Segment::CreateOrderingContext,
            Priority::MEDIUM,
            true,
        )?;
        reply.check_completion(Segment::CreateOrderingContext)?;
        let id = decode_ordering_context_id(&mut reply)?;
        debug!(oc_id = %id, "Peer created ordering context");
        Ok(id)
    }

    /// Return `id` for reuse
    pub fn release(&self, id: OrderingContextId) {
        let mut state = self.state.lock();
        state.live = state.live.saturating_sub(1);
        state.free.push(id);
    }

    /// Ids currently held by ordering contexts
    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    /// Ids waiting for reuse
    pub fn pooled(&self) -> usize {
        self.state.lock().free.len()
    }
}

impl Default for OrderingContextPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-conversation client state
#[derive(Debug, Default)]
pub struct ClientConversationState {
    ordering_contexts: OrderingContextPool,
}

impl ClientConversationState {
    /// Fresh state
    pub fn new() -> Self {
        Self::default()
    }

    /// State attached to `conversation`, created on first use
    pub fn attached(conversation: &dyn Conversation) -> CommsResult<Arc<Self>> {
        conversation.conversation_attachment().get_or_init(Self::new)
    }

    /// Ordering context id pool
    pub fn ordering_contexts(&self) -> &OrderingContextPool {
        &self.ordering_contexts
    }
}
