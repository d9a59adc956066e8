//! Delivery of remote events to application listeners
//!
//! Each remote event becomes one task on the dispatch pool. Inside the task
//! every listener call is bracketed by the connection's callback synchronizer,
//! so message delivery and exception delivery never run application code at
//! the same time. A listener that fails or panics is logged and the remaining
//! listeners still run.

use crate::message::ReceivedMessage;
use corelink_concurrency::{CallbackGroup, CallbackSynchronizer, DispatchPool};
use corelink_core::{CommsError, CommsResult};
use parking_lot::RwLock;
use std::any::Any;
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Result of a listener callback
pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Receives connection-level events
pub trait ConnectionListener: Send + Sync {
    /// The engine reported a failure not tied to any call in progress
    fn async_exception(&self, error: &CommsError) -> ListenerResult;

    /// The link to the engine failed
    fn connection_lost(&self, error: &CommsError) -> ListenerResult;
}

/// Receives asynchronously delivered messages
pub trait MessageListener: Send + Sync {
    /// A batch of messages arrived for the listener's consumer
    fn consume_messages(&self, messages: &[ReceivedMessage]) -> ListenerResult;
}

/// Hands remote events to listeners on the dispatch pool
pub struct CallbackDispatcher {
    pool: Arc<DispatchPool>,
    synchronizer: Arc<CallbackSynchronizer>,
    listeners: Arc<RwLock<Vec<Arc<dyn ConnectionListener>>>>,
}

impl CallbackDispatcher {
    /// Dispatcher running on `pool`, serialized by `synchronizer`
    pub fn new(pool: Arc<DispatchPool>, synchronizer: Arc<CallbackSynchronizer>) -> Self {
        Self {
            pool,
            synchronizer,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Synchronizer bracketing every listener call
    pub fn synchronizer(&self) -> &Arc<CallbackSynchronizer> {
        &self.synchronizer
    }

    /// Add a connection listener
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a previously added listener; false if it was not registered
    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    /// Number of registered connection listeners
    pub fn connection_listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an asynchronous exception to every connection listener
    pub fn dispatch_async_exception(&self, error: CommsError) -> CommsResult<()> {
        self.dispatch_connection_event(error, "async_exception", |listener, error| {
            listener.async_exception(error)
        })
    }

    /// Tell every connection listener the link failed
    pub fn dispatch_connection_lost(&self, error: CommsError) -> CommsResult<()> {
        self.dispatch_connection_event(error, "connection_lost", |listener, error| {
            listener.connection_lost(error)
        })
    }

    fn dispatch_connection_event<F>(
        &self,
        error: CommsError,
        event: &'static str,
        call: F,
    ) -> CommsResult<()>
    where
        F: Fn(&dyn ConnectionListener, &CommsError) -> ListenerResult + Send + 'static,
    {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            debug!(event, error = %error, "No connection listeners for event");
            return Ok(());
        }

        let synchronizer = Arc::clone(&self.synchronizer);
        self.pool.submit(move || {
            for listener in &listeners {
                let _guard = synchronizer.enter_exception();
                invoke(CallbackGroup::Exception, event, || {
                    call(listener.as_ref(), &error)
                });
            }
        })?;
        Ok(())
    }

    /// Deliver `messages` to `listener`
    pub fn deliver_messages(
        &self,
        listener: Arc<dyn MessageListener>,
        messages: Vec<ReceivedMessage>,
    ) -> CommsResult<()> {
        let synchronizer = Arc::clone(&self.synchronizer);
        self.pool.submit(move || {
            let _guard = synchronizer.enter_message();
            invoke(CallbackGroup::Message, "consume_messages", || {
                listener.consume_messages(&messages)
            });
        })?;
        Ok(())
    }

    /// Block until every queued event has been delivered
    pub fn drain(&self) {
        self.pool.drain();
    }
}

fn invoke<F>(group: CallbackGroup, event: &'static str, call: F)
where
    F: FnOnce() -> ListenerResult,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(group = %group, event, error = %e, "Listener returned an error"),
        Err(panic) => error!(
            group = %group,
            event,
            panic = panic_message(&*panic),
            "Listener panicked"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

fn same_listener(a: &Arc<dyn ConnectionListener>, b: &Arc<dyn ConnectionListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
