//! Behaviour shared by every transaction proxy
//!
//! - The link-unique transaction id, released on drop
//! - The lowest wire priority used by a send under the transaction
//! - Consumers to notify on rollback when strict redelivery ordering is on
//! - Whether the peer has already created the transaction

use super::RedeliveryListener;
use crate::link::ClientLinkLevelState;
use corelink_core::{CommsResult, Priority, TransactionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared state of a transaction proxy
pub struct TransactionCore {
    id: TransactionId,
    link: Arc<ClientLinkLevelState>,
    creating_conversation_id: i32,
    lowest_priority: AtomicU8,
    redelivery: Mutex<Vec<Arc<dyn RedeliveryListener>>>,
    server_created: AtomicBool,
}

impl TransactionCore {
    /// Allocate an id on `link` for a proxy created by `conversation_id`
    pub fn new(link: Arc<ClientLinkLevelState>, conversation_id: i32) -> CommsResult<Self> {
        let id = link.transaction_ids().allocate()?;
        debug!(tx_id = %id, conversation_id, "Allocated transaction id");
        Ok(Self {
            id,
            link,
            creating_conversation_id: conversation_id,
            lowest_priority: AtomicU8::new(Priority::HIGHEST.value()),
            redelivery: Mutex::new(Vec::new()),
            server_created: AtomicBool::new(false),
        })
    }

    /// Link-unique id of this proxy
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Conversation that created this proxy
    pub fn creating_conversation_id(&self) -> i32 {
        self.creating_conversation_id
    }

    /// Note that a message was sent under the transaction at `priority`
    pub fn record_priority(&self, priority: Priority) {
        self.lowest_priority
            .fetch_min(priority.value(), Ordering::AcqRel);
    }

    /// Priority for the next commit or rollback
    ///
    /// The lowest class any enlisted send used, so the transport sequences
    /// the completion after every one of them. `HIGHEST` before any send.
    pub fn completion_priority(&self) -> Priority {
        Priority(self.lowest_priority.load(Ordering::Acquire))
    }

    /// Forget the recorded priorities after a completion
    pub fn reset_priority(&self) {
        self.lowest_priority
            .store(Priority::HIGHEST.value(), Ordering::Release);
    }

    /// Remember `consumer` for rollback notification; registering twice is a
    /// no-op
    pub fn register_redelivery(&self, consumer: Arc<dyn RedeliveryListener>) {
        let mut registered = self.redelivery.lock();
        if !registered.iter().any(|c| same_listener(c, &consumer)) {
            registered.push(consumer);
        }
    }

    /// Consumers currently registered
    pub fn redelivery_count(&self) -> usize {
        self.redelivery.lock().len()
    }

    /// Tell every registered consumer the transaction rolled back, then clear
    /// the registrations
    ///
    /// A failed notification is logged and the rest are still notified.
    pub fn notify_rollback(&self) {
        let consumers = std::mem::take(&mut *self.redelivery.lock());
        for consumer in consumers {
            if let Err(e) = consumer.rollback_occurred(self.id) {
                warn!(
                    tx_id = %self.id,
                    error = %e,
                    "Consumer could not be told about rollback"
                );
            }
        }
    }

    /// Drop the registrations after a commit
    pub fn clear_redelivery(&self) {
        self.redelivery.lock().clear();
    }

    /// Reset at the end of every commit or rollback
    pub fn completed(&self, rolled_back: bool) {
        self.reset_priority();
        if rolled_back {
            self.notify_rollback();
        } else {
            self.clear_redelivery();
        }
    }

    /// True the first time it is called after creation or
    /// [`reset_server_created`](Self::reset_server_created)
    ///
    /// The flow that observes `true` carries the create bit.
    pub fn take_create(&self) -> bool {
        !self.server_created.swap(true, Ordering::AcqRel)
    }

    /// True once a flow has told the peer to create the transaction
    pub fn is_server_created(&self) -> bool {
        self.server_created.load(Ordering::Acquire)
    }

    /// The next flow must create the transaction again
    pub fn reset_server_created(&self) {
        self.server_created.store(false, Ordering::Release);
    }
}

fn same_listener(a: &Arc<dyn RedeliveryListener>, b: &Arc<dyn RedeliveryListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl Drop for TransactionCore {
    fn drop(&mut self) {
        self.link.transaction_ids().release(self.id);
    }
}

impl fmt::Debug for TransactionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCore")
            .field("id", &self.id)
            .field("completion_priority", &self.completion_priority())
            .field("redelivery", &self.redelivery_count())
            .field("server_created", &self.is_server_created())
            .finish()
    }
}
