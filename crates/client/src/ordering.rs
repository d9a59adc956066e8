//! Use-counted ordering contexts
//!
//! Sends that share an ordering context are delivered in the order they were
//! sent. The context only holds an id while something is bound to it: the
//! first `bind` acquires an id from the connection's pool (or the peer), the
//! last `unbind` hands it back. Nothing is torn down on the peer.

use crate::context::ConnectionContext;
use corelink_core::{CommsError, CommsResult, OrderingContextId};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

struct Binding {
    id: Option<OrderingContextId>,
    use_count: usize,
}

/// Ordering context owned by the application
pub struct OrderingContext {
    context: Arc<ConnectionContext>,
    binding: Mutex<Binding>,
    associated_queue: Mutex<Option<Weak<dyn Any + Send + Sync>>>,
}

impl OrderingContext {
    pub(crate) fn new(context: Arc<ConnectionContext>) -> Self {
        Self {
            context,
            binding: Mutex::new(Binding {
                id: None,
                use_count: 0,
            }),
            associated_queue: Mutex::new(None),
        }
    }

    /// Add a user, acquiring an id if the context has none
    pub fn bind(&self) -> CommsResult<()> {
        let mut binding = self.binding.lock();
        if binding.id.is_none() {
            self.context.check_open()?;
            let id = self
                .context
                .conversation_state()
                .ordering_contexts()
                .acquire(self.context.conversation())?;
            debug!(oc_id = %id, "Ordering context acquired an id");
            binding.id = Some(id);
        }
        binding.use_count += 1;
        Ok(())
    }

    /// Remove a user; the last one returns the id to the pool
    ///
    /// # Errors
    ///
    /// `IncorrectCall` if the context is not bound.
    pub fn unbind(&self) -> CommsResult<()> {
        let mut binding = self.binding.lock();
        if binding.use_count == 0 {
            return Err(CommsError::IncorrectCall(
                "unbind of an ordering context that is not bound".to_string(),
            ));
        }
        binding.use_count -= 1;
        if binding.use_count == 0 {
            if let Some(id) = binding.id.take() {
                self.context
                    .conversation_state()
                    .ordering_contexts()
                    .release(id);
                debug!(oc_id = %id, "Ordering context released its id");
            }
        }
        Ok(())
    }

    /// Bind for the lifetime of the returned guard
    pub fn bind_scoped(&self) -> CommsResult<OrderingBinding<'_>> {
        self.bind()?;
        Ok(OrderingBinding { context: self })
    }

    /// Id of the context while it is bound
    ///
    /// # Errors
    ///
    /// `IdentityNotAssigned` before the first bind or after the last unbind.
    pub fn id(&self) -> CommsResult<OrderingContextId> {
        self.binding.lock().id.ok_or_else(|| {
            CommsError::IdentityNotAssigned(
                "ordering context is not bound to an id".to_string(),
            )
        })
    }

    /// True while the context holds an id
    pub fn is_alive(&self) -> bool {
        self.binding.lock().id.is_some()
    }

    /// Current number of users
    pub fn use_count(&self) -> usize {
        self.binding.lock().use_count
    }

    /// Queue this context delivers to, if it is still alive
    pub fn associated_queue<Q: Any + Send + Sync>(&self) -> Option<Arc<Q>> {
        let queue = self.associated_queue.lock().as_ref()?.upgrade()?;
        queue.downcast::<Q>().ok()
    }

    /// Remember `queue` without keeping it alive
    pub fn set_associated_queue<Q: Any + Send + Sync>(&self, queue: &Arc<Q>) {
        let queue: Arc<dyn Any + Send + Sync> = Arc::clone(queue) as Arc<dyn Any + Send + Sync>;
        *self.associated_queue.lock() = Some(Arc::downgrade(&queue));
    }

    /// Forget the associated queue
    pub fn clear_associated_queue(&self) {
        *self.associated_queue.lock() = None;
    }
}

impl Drop for OrderingContext {
    fn drop(&mut self) {
        let binding = self.binding.get_mut();
        if let Some(id) = binding.id.take() {
            self.context
                .conversation_state()
                .ordering_contexts()
                .release(id);
        }
    }
}

impl fmt::Debug for OrderingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.binding.lock();
        f.debug_struct("OrderingContext")
            .field("id", &binding.id)
            .field("use_count", &binding.use_count)
            .finish()
    }
}

/// One use of an ordering context, unbound on drop
#[must_use = "dropping the binding unbinds the ordering context immediately"]
pub struct OrderingBinding<'a> {
    context: &'a OrderingContext,
}

impl OrderingBinding<'_> {
    /// Id of the bound context
    pub fn id(&self) -> CommsResult<OrderingContextId> {
        self.context.id()
    }
}

impl Drop for OrderingBinding<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.context.unbind() {
            error!(error = %e, "Ordering context binding released twice");
        }
    }
}
