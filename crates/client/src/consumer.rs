//! Consumer holding messages read ahead of the application
//!
//! The engine streams messages to the consumer before the application asks
//! for them. When a transaction the consumer received under rolls back, those
//! buffered messages would overtake the redelivered ones, so with strict
//! redelivery ordering the consumer registers with the transaction and throws
//! its buffer away on rollback.

use crate::message::ReceivedMessage;
use crate::transaction::{RedeliveryListener, TransactionOperations};
use corelink_core::{CommsError, CommsResult, TransactionId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Consumer with a read-ahead buffer
pub struct ReadAheadConsumer {
    buffer: Mutex<VecDeque<ReceivedMessage>>,
    purges: AtomicU64,
    closed: AtomicBool,
    me: Weak<ReadAheadConsumer>,
}

impl ReadAheadConsumer {
    /// Empty consumer
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            buffer: Mutex::new(VecDeque::new()),
            purges: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// Buffer a message streamed by the engine
    pub fn enqueue(&self, message: ReceivedMessage) -> CommsResult<()> {
        self.check_open()?;
        self.buffer.lock().push_back(message);
        Ok(())
    }

    /// Take the next buffered message
    ///
    /// When `transaction` is supplied it must still be valid; with strict
    /// redelivery ordering on, the consumer registers itself with it.
    pub fn receive(
        &self,
        transaction: Option<&dyn TransactionOperations>,
    ) -> CommsResult<Option<ReceivedMessage>> {
        self.check_open()?;
        if let Some(transaction) = transaction {
            if !transaction.is_valid() {
                return Err(CommsError::IncorrectCall(
                    "receive under a transaction that is no longer valid".to_string(),
                ));
            }
            if transaction.strict_redelivery_ordering() {
                if let Some(me) = self.me.upgrade() {
                    transaction.register_redelivery_consumer(me);
                }
            }
        }
        Ok(self.buffer.lock().pop_front())
    }

    /// Messages waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Number of times the buffer was discarded after a rollback
    pub fn purge_count(&self) -> u64 {
        self.purges.load(Ordering::Acquire)
    }

    /// Stop the consumer; later calls fail with `ConnectionUnavailable`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.buffer.lock().clear();
    }

    fn check_open(&self) -> CommsResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CommsError::ConnectionUnavailable(
                "the consumer has been closed".to_string(),
            ));
        }
        Ok(())
    }
}

impl RedeliveryListener for ReadAheadConsumer {
    fn rollback_occurred(&self, transaction_id: TransactionId) -> CommsResult<()> {
        self.check_open()?;
        let discarded = {
            let mut buffer = self.buffer.lock();
            let discarded = buffer.len();
            buffer.clear();
            discarded
        };
        self.purges.fetch_add(1, Ordering::AcqRel);
        debug!(tx_id = %transaction_id, discarded, "Purged read-ahead buffer after rollback");
        Ok(())
    }
}

impl fmt::Debug for ReadAheadConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadAheadConsumer")
            .field("buffered", &self.buffered())
            .field("purges", &self.purge_count())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_in_arrival_order() {
        let consumer = ReadAheadConsumer::new();
        consumer.enqueue(ReceivedMessage::new(1, b"a".to_vec())).unwrap();
        consumer.enqueue(ReceivedMessage::new(2, b"b".to_vec())).unwrap();

        assert_eq!(consumer.receive(None).unwrap().unwrap().handle, 1);
        assert_eq!(consumer.receive(None).unwrap().unwrap().handle, 2);
        assert!(consumer.receive(None).unwrap().is_none());
    }

    #[test]
    fn test_rollback_purges_buffer() {
        let consumer = ReadAheadConsumer::new();
        for handle in 0..3 {
            consumer.enqueue(ReceivedMessage::new(handle, vec![])).unwrap();
        }
        consumer.rollback_occurred(TransactionId(5)).unwrap();
        assert_eq!(consumer.buffered(), 0);
        assert_eq!(consumer.purge_count(), 1);
    }

    #[test]
    fn test_closed_consumer_rejects_notification() {
        let consumer = ReadAheadConsumer::new();
        consumer.close();
        assert!(matches!(
            consumer.rollback_occurred(TransactionId(1)),
            Err(CommsError::ConnectionUnavailable(_))
        ));
        assert_eq!(consumer.purge_count(), 0);
    }
}
