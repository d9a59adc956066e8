//! Client connection proxy
//!
//! A `Connection` wraps one conversation with the messaging engine. It is the
//! factory for transactions, XA resources and ordering contexts, and it owns
//! the send path.
//!
//! ## Send path
//!
//! ```text
//! bind ordering context (scoped)
//!   -> reject completed transaction
//!   -> map message priority to wire priority
//!   -> whole frame       if len <  chunking threshold
//!      one frame/slice   otherwise (all but the last fire-and-forget)
//!   -> last frame exchanged iff a reply is required
//!   -> record wire priority on the transaction
//! ```

use crate::callbacks::{CallbackDispatcher, ConnectionListener, MessageListener};
use crate::config::ClientConfig;
use crate::context::ConnectionContext;
use crate::message::{OutboundMessage, ReceivedMessage};
use crate::ordering::OrderingContext;
use crate::transaction::{
    LocalTransaction, SuspendableResource, TransactionOperations, XaResourceFactory,
    XaResourceState,
};
use corelink_concurrency::{CallbackSynchronizer, DispatchPool};
use corelink_core::{CommsError, CommsResult, OrderingContextId, Priority};
use corelink_wire::control::encode_close_connection;
use corelink_wire::message::{encode_chunk, encode_whole_message};
use corelink_wire::{
    Conversation, DestinationAddress, RequestFrame, SendHeader, Segment, ThrottlingPolicy,
    TransactionReference,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Factory handing the shared context to every resource it builds
struct ResourceFactory {
    context: Arc<ConnectionContext>,
}

impl XaResourceFactory for ResourceFactory {
    fn create_xa_resource(&self, message_store: bool) -> CommsResult<Arc<XaResourceState>> {
        XaResourceState::create(Arc::clone(&self.context), message_store)
    }
}

/// Connection to a messaging engine
pub struct Connection {
    context: Arc<ConnectionContext>,
    dispatcher: CallbackDispatcher,
}

impl Connection {
    /// Connection over an established `conversation`
    ///
    /// Remote events are delivered on `pool`.
    pub fn new(
        conversation: Arc<dyn Conversation>,
        config: ClientConfig,
        pool: Arc<DispatchPool>,
    ) -> CommsResult<Self> {
        config.validate()?;
        let context = Arc::new(ConnectionContext::new(conversation, config)?);
        info!(
            conversation_id = context.conversation().conversation_id(),
            fap_level = context.fap_level().0,
            optimized = context.requires_optimized_transactions(),
            "Connection created"
        );
        Ok(Self {
            context,
            dispatcher: CallbackDispatcher::new(pool, Arc::new(CallbackSynchronizer::new())),
        })
    }

    /// Connection with its own dispatch pool sized from `config`
    pub fn with_own_pool(conversation: Arc<dyn Conversation>, config: ClientConfig) -> CommsResult<Self> {
        config.validate()?;
        let pool = Arc::new(DispatchPool::new(
            config.dispatch_threads,
            config.dispatch_queue_depth,
        )?);
        Self::new(conversation, config, pool)
    }

    /// Configuration the connection was created with
    pub fn config(&self) -> &ClientConfig {
        self.context.config()
    }

    /// Identity of the messaging engine, `None` once closed or if unknown
    pub fn me_uuid(&self) -> Option<Uuid> {
        self.context.me_uuid()
    }

    /// True after [`close`](Self::close)
    pub fn is_closed(&self) -> bool {
        self.context.is_closed()
    }

    /// Whether consumers register with transactions for rollback notification
    pub fn strict_redelivery_ordering(&self) -> bool {
        self.context.strict_redelivery_ordering()
    }

    /// Change strict redelivery ordering for transactions used from now on
    pub fn set_strict_redelivery_ordering(&self, strict: bool) {
        debug!(strict, "Strict redelivery ordering changed");
        self.context.set_strict_redelivery_ordering(strict);
    }

    /// Synchronizer bracketing listener calls on this connection
    pub fn synchronizer(&self) -> &Arc<CallbackSynchronizer> {
        self.dispatcher.synchronizer()
    }

    /// Event dispatcher of this connection
    pub fn dispatcher(&self) -> &CallbackDispatcher {
        &self.dispatcher
    }

    /// Add a listener for asynchronous exceptions and connection loss
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.dispatcher.add_connection_listener(listener);
    }

    /// Remove a connection listener; false if it was not registered
    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.dispatcher.remove_connection_listener(listener)
    }

    /// Deliver a batch of messages to `listener` on the dispatch pool
    pub fn deliver_messages(
        &self,
        listener: Arc<dyn MessageListener>,
        messages: Vec<ReceivedMessage>,
    ) -> CommsResult<()> {
        self.context.check_open()?;
        self.dispatcher.deliver_messages(listener, messages)
    }

    /// Report an asynchronous exception to connection listeners
    pub fn report_async_exception(&self, error: CommsError) -> CommsResult<()> {
        self.dispatcher.dispatch_async_exception(error)
    }

    /// Report loss of the link; the connection is closed afterwards
    pub fn report_connection_lost(&self, error: CommsError) -> CommsResult<()> {
        warn!(error = %error, "Connection lost");
        self.context.mark_closed();
        self.dispatcher.dispatch_connection_lost(error)
    }

    /// Start an uncoordinated transaction
    pub fn create_uncoordinated_transaction(
        &self,
        allow_subordinates: bool,
    ) -> CommsResult<LocalTransaction> {
        LocalTransaction::create(Arc::clone(&self.context), allow_subordinates)
    }

    /// XA resource supporting suspend and resume
    pub fn create_xa_resource(&self, message_store: bool) -> CommsResult<SuspendableResource> {
        self.context.check_open()?;
        SuspendableResource::new(self.resource_factory(), message_store)
    }

    /// Single-branch XA resource without suspend/resume support
    pub fn create_xa_resource_state(&self, message_store: bool) -> CommsResult<Arc<XaResourceState>> {
        XaResourceState::create(Arc::clone(&self.context), message_store)
    }

    /// Factory that builds XA resources on this connection
    pub fn resource_factory(&self) -> Arc<dyn XaResourceFactory> {
        Arc::new(ResourceFactory {
            context: Arc::clone(&self.context),
        })
    }

    /// New ordering context; it holds no id until first bound
    pub fn create_ordering_context(&self) -> CommsResult<OrderingContext> {
        self.context.check_open()?;
        Ok(OrderingContext::new(Arc::clone(&self.context)))
    }

    /// Send `message` to `destination`
    ///
    /// # Errors
    ///
    /// `ConnectionUnavailable` after close; `IncorrectCall` if `transaction`
    /// has completed; any failure binding `ordering` or sending a frame.
    pub fn send(
        &self,
        message: &OutboundMessage,
        transaction: Option<&dyn TransactionOperations>,
        destination: &DestinationAddress,
        ordering: Option<&OrderingContext>,
    ) -> CommsResult<()> {
        self.context.check_open()?;
        let binding = match ordering {
            Some(context) => Some(context.bind_scoped()?),
            None => None,
        };

        if let Some(transaction) = transaction {
            if !transaction.is_valid() {
                return Err(CommsError::IncorrectCall(
                    "send under a transaction that is no longer valid".to_string(),
                ));
            }
        }

        let priority = Priority::from_message_priority(message.priority);
        let require_reply = match transaction {
            Some(_) if !self.context.config().exchange_transacted_sends => false,
            _ => message.reliability.requires_reply(),
        };
        let ordering_id = match &binding {
            Some(binding) => Some(binding.id()?),
            None => None,
        };

        let length = message.len();
        let sliced = length >= self.context.config().chunking_threshold_bytes;
        debug!(
            bytes = length,
            slices = message.slices.len(),
            chunked = sliced,
            priority = %priority,
            require_reply,
            "Sending message"
        );

        if sliced {
            let count = message.slices.len();
            for (index, slice) in message.slices.iter().enumerate() {
                // Each slice asks for its own reference; only the first may
                // carry the create bit
                let transaction_reference = reference(transaction)?;
                let header = self.send_header(message, destination, ordering_id, &transaction_reference);
                let request = encode_chunk(&header, index, count, slice)?;
                if index + 1 == count && require_reply {
                    self.exchange(request, Segment::SendChunkedConnMessage, priority)?;
                } else {
                    self.context.conversation().send(
                        request,
                        Segment::SendChunkedConnMessageNoReply,
                        priority,
                        false,
                        ThrottlingPolicy::BlockThread,
                    )?;
                }
            }
        } else {
            let transaction_reference = reference(transaction)?;
            let header = self.send_header(message, destination, ordering_id, &transaction_reference);
            let request = encode_whole_message(&header, &message.slices)?;
            if require_reply {
                self.exchange(request, Segment::SendConnMessage, priority)?;
            } else {
                self.context.conversation().send(
                    request,
                    Segment::SendConnMessageNoReply,
                    priority,
                    false,
                    ThrottlingPolicy::BlockThread,
                )?;
            }
        }

        if let Some(transaction) = transaction {
            transaction.record_message_priority(priority);
        }
        Ok(())
    }

    fn send_header<'a>(
        &self,
        message: &'a OutboundMessage,
        destination: &'a DestinationAddress,
        ordering_context: Option<OrderingContextId>,
        transaction: &'a TransactionReference,
    ) -> SendHeader<'a> {
        SendHeader {
            connection_object_id: self.context.connection_object_id(),
            ordering_context,
            transaction,
            destination_type: message.destination_type,
            alternate_user: message.alternate_user.as_deref(),
            destination,
        }
    }

    fn exchange(
        &self,
        request: RequestFrame,
        segment: Segment,
        priority: Priority,
    ) -> CommsResult<()> {
        let mut reply = self
            .context
            .conversation()
            .exchange(request, segment, priority, false)?;
        reply.check_completion(segment)
    }

    /// Close the connection
    ///
    /// Tells the engine best-effort; every later operation fails with
    /// `ConnectionUnavailable`. Closing twice is a no-op.
    pub fn close(&self) -> CommsResult<()> {
        if !self.context.mark_closed() {
            return Ok(());
        }
        let request = encode_close_connection(self.context.connection_object_id());
        let result = self
            .context
            .conversation()
            .exchange(request, Segment::CloseConnection, Priority::HIGHEST, true)
            .and_then(|mut reply| reply.check_completion(Segment::CloseConnection));
        match result {
            Ok(()) => {
                info!("Connection closed");
                Ok(())
            }
            Err(e) if e.is_connection_failure() => {
                debug!(error = %e, "Link already gone while closing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn reference(transaction: Option<&dyn TransactionOperations>) -> CommsResult<TransactionReference> {
    match transaction {
        Some(transaction) => transaction.reference(),
        None => Ok(TransactionReference::None),
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("conversation_id", &self.context.conversation().conversation_id())
            .field("closed", &self.is_closed())
            .field("me_uuid", &self.context.me_uuid())
            .finish()
    }
}
