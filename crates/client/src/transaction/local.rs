//! Uncoordinated (local) transactions
//!
//! A plain local transaction is created on the peer by an explicit flow sent
//! when the proxy is built. An optimized one is created by the first send
//! that references it. Either way the application ends it with exactly one
//! `commit` or `rollback`; afterwards the proxy is no longer usable.

use super::{RedeliveryListener, TransactionCore, TransactionOperations};
use crate::context::ConnectionContext;
use corelink_core::{CommsError, CommsResult, Priority, TransactionId, TransactionKind};
use corelink_wire::control::{
    encode_create_uncoordinated_transaction, encode_transaction_completion,
};
use corelink_wire::{OptimizedReference, Segment, ThrottlingPolicy, TransactionReference};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Application-demarcated transaction on one connection
pub struct LocalTransaction {
    core: TransactionCore,
    context: Arc<ConnectionContext>,
    kind: TransactionKind,
    allow_subordinates: bool,
    valid: AtomicBool,
}

impl LocalTransaction {
    pub(crate) fn create(
        context: Arc<ConnectionContext>,
        allow_subordinates: bool,
    ) -> CommsResult<Self> {
        context.check_open()?;
        let core = TransactionCore::new(
            Arc::clone(context.link()),
            context.conversation().conversation_id(),
        )?;

        let kind = if context.requires_optimized_transactions() {
            TransactionKind::Optimized
        } else {
            let request = encode_create_uncoordinated_transaction(
                context.connection_object_id(),
                core.id(),
                context.fap_level(),
                allow_subordinates,
            );
            context.conversation().send(
                request,
                Segment::CreateUncoordinatedTransaction,
                Priority::HIGH,
                true,
                ThrottlingPolicy::DoNotThrottle,
            )?;
            TransactionKind::Plain
        };
        debug!(tx_id = %core.id(), kind = ?kind, allow_subordinates, "Created local transaction");

        Ok(Self {
            core,
            context,
            kind,
            allow_subordinates,
            valid: AtomicBool::new(true),
        })
    }

    /// Commit the work done under this transaction
    ///
    /// # Errors
    ///
    /// `IncorrectCall` if the transaction already completed; any failure of the
    /// commit exchange.
    pub fn commit(&self) -> CommsResult<()> {
        self.complete(Segment::CommitTransaction)
    }

    /// Roll back the work done under this transaction
    ///
    /// Consumers registered for strict redelivery ordering are notified.
    pub fn rollback(&self) -> CommsResult<()> {
        self.complete(Segment::RollbackTransaction)
    }

    /// Shared state of the proxy
    pub fn core(&self) -> &TransactionCore {
        &self.core
    }

    fn complete(&self, segment: Segment) -> CommsResult<()> {
        self.context.check_open()?;
        if self.valid.swap(false, Ordering::AcqRel) {
            let priority = self.core.completion_priority();
            let request = encode_transaction_completion(
                self.context.connection_object_id(),
                &self.completion_reference(),
            );
            debug!(tx_id = %self.core.id(), segment = %segment, priority = %priority, "Completing local transaction");

            let result = self
                .context
                .conversation()
                .exchange(request, segment, priority, true)
                .and_then(|mut reply| reply.check_completion(segment));
            self.core
                .completed(segment == Segment::RollbackTransaction);
            result
        } else {
            Err(CommsError::IncorrectCall(format!(
                "{} has already completed",
                self.core.id()
            )))
        }
    }

    /// Reference used by commit and rollback; never creates the transaction
    fn completion_reference(&self) -> TransactionReference {
        match self.kind {
            TransactionKind::Optimized => TransactionReference::Optimized(OptimizedReference {
                local: true,
                create: false,
                subordinates_allowed: self.allow_subordinates,
                creating_conversation_id: self.core.creating_conversation_id(),
                transaction_id: self.core.id(),
                xid: None,
                end_previous: None,
            }),
            _ => TransactionReference::Plain(self.core.id()),
        }
    }
}

impl TransactionOperations for LocalTransaction {
    fn kind(&self) -> TransactionKind {
        self.kind
    }

    fn transaction_id(&self) -> CommsResult<TransactionId> {
        Ok(self.core.id())
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn reference(&self) -> CommsResult<TransactionReference> {
        Ok(match self.kind {
            TransactionKind::Optimized => TransactionReference::Optimized(OptimizedReference {
                local: true,
                create: self.core.take_create(),
                subordinates_allowed: self.allow_subordinates,
                creating_conversation_id: self.core.creating_conversation_id(),
                transaction_id: self.core.id(),
                xid: None,
                end_previous: None,
            }),
            _ => TransactionReference::Plain(self.core.id()),
        })
    }

    fn record_message_priority(&self, priority: Priority) {
        self.core.record_priority(priority);
    }

    fn strict_redelivery_ordering(&self) -> bool {
        self.context.strict_redelivery_ordering()
    }

    fn register_redelivery_consumer(&self, consumer: Arc<dyn RedeliveryListener>) {
        self.core.register_redelivery(consumer);
    }
}

impl fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransaction")
            .field("core", &self.core)
            .field("kind", &self.kind)
            .field("valid", &self.is_valid())
            .finish()
    }
}
