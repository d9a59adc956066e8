//! Connection tests for the client proxies
//!
//! These tests exercise the non-XA surface of a connection against a
//! recording conversation:
//!
//! 1. **Ordering contexts** - use counting and id pooling
//! 2. **Local transactions** - creation flows, completion priority, reuse
//! 3. **Strict redelivery** - consumers purged on rollback
//! 4. **Send path** - whole vs. chunked framing and the reply rule
//! 5. **Lifecycle** - close and listener delivery
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test -p corelink-client --test connection_tests
//! ```

use corelink_client::{
    ClientConfig, ClientConversationState, ClientLinkLevelState, ConnectionListener, Connection,
    ListenerResult, MessageListener, OutboundMessage, ReadAheadConsumer, ReceivedMessage,
    RedeliveryListener, TransactionOperations,
};
use corelink_concurrency::DispatchPool;
use corelink_core::{CommsError, CommsResult, Priority, Reliability, TransactionId, TransactionKind};
use corelink_wire::message::{CHUNKED_MESSAGE_FIRST, CHUNKED_MESSAGE_LAST, CHUNKED_MESSAGE_MIDDLE};
use corelink_wire::testing::RecordingConversation;
use corelink_wire::transaction::{
    OPTIMIZED_TX_FLAGS_CREATE_BIT, OPTIMIZED_TX_FLAGS_LOCAL_BIT, OPTIMIZED_TX_FLAGS_TRANSACTED_BIT,
};
use corelink_wire::{DestinationAddress, HandshakeProperties, Segment};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn connect_with(
    handshake: HandshakeProperties,
    config: ClientConfig,
) -> (Arc<RecordingConversation>, Connection) {
    let conv = Arc::new(RecordingConversation::new(handshake));
    let pool = Arc::new(DispatchPool::new(2, 64).unwrap());
    let conn = Connection::new(conv.clone(), config, pool).unwrap();
    (conv, conn)
}

fn connect() -> (Arc<RecordingConversation>, Connection) {
    connect_with(HandshakeProperties::default(), ClientConfig::default())
}

fn connect_optimized() -> (Arc<RecordingConversation>, Connection) {
    connect_with(
        HandshakeProperties {
            requires_optimized_transactions: true,
            ..HandshakeProperties::default()
        },
        ClientConfig::default(),
    )
}

fn strict_config() -> ClientConfig {
    ClientConfig {
        strict_redelivery_ordering: true,
        ..ClientConfig::default()
    }
}

fn queue() -> DestinationAddress {
    DestinationAddress::new("orders")
}

fn message(reliability: Reliability, priority: u8) -> OutboundMessage {
    OutboundMessage::new(reliability, vec![b"payload".to_vec()]).with_priority(priority)
}

/// Listener that counts notifications and always fails
struct FailingListener {
    calls: AtomicUsize,
}

impl RedeliveryListener for FailingListener {
    fn rollback_occurred(&self, _transaction_id: TransactionId) -> CommsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CommsError::ConnectionUnavailable("consumer already failed".into()))
    }
}

// ============================================================================
// Ordering contexts
// ============================================================================

mod ordering_contexts {
    use super::*;

    #[test]
    fn test_bind_unbind_cycle_returns_id_once() {
        let (conv, conn) = connect();
        let pool_state = ClientConversationState::attached(conv.as_ref()).unwrap();
        let context = conn.create_ordering_context().unwrap();

        for _ in 0..3 {
            context.bind().unwrap();
        }
        let id = context.id().unwrap();
        assert_eq!(context.use_count(), 3);
        assert_eq!(conv.count(Segment::CreateOrderingContext), 1);

        context.unbind().unwrap();
        context.unbind().unwrap();
        assert_eq!(pool_state.ordering_contexts().pooled(), 0);
        context.unbind().unwrap();
        assert_eq!(pool_state.ordering_contexts().pooled(), 1);
        assert!(!context.is_alive());

        // Re-acquires exactly once, from the pool
        context.bind().unwrap();
        context.bind().unwrap();
        assert_eq!(context.id().unwrap(), id);
        assert_eq!(pool_state.ordering_contexts().pooled(), 0);
        assert_eq!(conv.count(Segment::CreateOrderingContext), 1);
    }

    #[test]
    fn test_id_requires_binding() {
        let (_conv, conn) = connect();
        let context = conn.create_ordering_context().unwrap();
        assert!(matches!(
            context.id(),
            Err(CommsError::IdentityNotAssigned(_))
        ));

        context.bind().unwrap();
        context.unbind().unwrap();
        assert!(matches!(
            context.id(),
            Err(CommsError::IdentityNotAssigned(_))
        ));
    }

    #[test]
    fn test_unbind_of_unbound_context_is_rejected() {
        let (_conv, conn) = connect();
        let context = conn.create_ordering_context().unwrap();
        assert!(matches!(
            context.unbind(),
            Err(CommsError::IncorrectCall(_))
        ));
        assert_eq!(context.use_count(), 0);
    }

    #[test]
    fn test_contexts_get_distinct_ids() {
        let (_conv, conn) = connect();
        let a = conn.create_ordering_context().unwrap();
        let b = conn.create_ordering_context().unwrap();
        a.bind().unwrap();
        b.bind().unwrap();
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn test_associated_queue_is_weak() {
        let (_conv, conn) = connect();
        let context = conn.create_ordering_context().unwrap();
        let queue = Arc::new(String::from("orders"));
        context.set_associated_queue(&queue);

        assert_eq!(context.associated_queue::<String>().unwrap().as_str(), "orders");
        assert!(context.associated_queue::<u32>().is_none());

        drop(queue);
        assert!(context.associated_queue::<String>().is_none());
    }

    #[test]
    fn test_send_binds_for_the_call_only() {
        let (conv, conn) = connect();
        let context = conn.create_ordering_context().unwrap();

        conn.send(
            &message(Reliability::ExpressNonPersistent, 4),
            None,
            &queue(),
            Some(&context),
        )
        .unwrap();

        let mut frame = conv.frames_for(Segment::SendConnMessageNoReply)[0].reader();
        frame.get_i16().unwrap();
        assert_eq!(frame.get_i16().unwrap(), 1);
        assert_eq!(context.use_count(), 0);
        assert!(!context.is_alive());
    }

    #[test]
    fn test_failed_send_still_unbinds() {
        let (conv, conn) = connect();
        let context = conn.create_ordering_context().unwrap();
        conv.script_failure(
            Segment::SendConnMessageNoReply,
            CommsError::ConnectionDropped("peer went away".into()),
        );

        let result = conn.send(
            &message(Reliability::BestEffortNonPersistent, 4),
            None,
            &queue(),
            Some(&context),
        );
        assert!(matches!(result, Err(CommsError::ConnectionDropped(_))));
        assert_eq!(context.use_count(), 0);
    }
}

// ============================================================================
// Local transactions
// ============================================================================

mod local_transactions {
    use super::*;

    #[test]
    fn test_plain_transaction_is_created_explicitly() {
        let (conv, conn) = connect();
        let tx = conn.create_uncoordinated_transaction(true).unwrap();
        assert_eq!(tx.kind(), TransactionKind::Plain);

        let creates = conv.frames_for(Segment::CreateUncoordinatedTransaction);
        assert_eq!(creates.len(), 1);
        assert!(!creates[0].exchanged);
        assert_eq!(creates[0].priority, Priority::HIGH);

        let mut body = creates[0].reader();
        assert_eq!(body.get_i16().unwrap(), 1);
        assert_eq!(body.get_i32().unwrap(), tx.transaction_id().unwrap().0);
        assert!(body.get_bool().unwrap());
    }

    #[test]
    fn test_commit_runs_at_lowest_send_priority() {
        let (conv, conn) = connect();
        let tx = conn.create_uncoordinated_transaction(false).unwrap();

        // Message priorities 3, 0, 6 travel at wire priorities 5, 2, 8
        for priority in [3u8, 0, 6] {
            conn.send(
                &message(Reliability::ReliablePersistent, priority),
                Some(&tx),
                &queue(),
                None,
            )
            .unwrap();
        }
        let sent: Vec<Priority> = conv
            .frames_for(Segment::SendConnMessageNoReply)
            .iter()
            .map(|f| f.priority)
            .collect();
        assert_eq!(sent, vec![Priority(5), Priority(2), Priority(8)]);

        tx.commit().unwrap();
        let commits = conv.frames_for(Segment::CommitTransaction);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].priority, Priority(2));
    }

    #[test]
    fn test_completion_without_sends_uses_highest_priority() {
        let (conv, conn) = connect();
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        tx.rollback().unwrap();
        assert_eq!(
            conv.frames_for(Segment::RollbackTransaction)[0].priority,
            Priority::HIGHEST
        );
    }

    #[test]
    fn test_completed_transaction_is_rejected() {
        let (conv, conn) = connect();
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        tx.commit().unwrap();
        assert!(!tx.is_valid());

        assert!(matches!(tx.commit(), Err(CommsError::IncorrectCall(_))));
        assert!(matches!(tx.rollback(), Err(CommsError::IncorrectCall(_))));
        assert!(matches!(
            conn.send(
                &message(Reliability::ReliablePersistent, 4),
                Some(&tx),
                &queue(),
                None
            ),
            Err(CommsError::IncorrectCall(_))
        ));
        assert_eq!(conv.count(Segment::CommitTransaction), 1);
    }

    #[test]
    fn test_optimized_transaction_created_by_first_send() {
        let (conv, conn) = connect_optimized();
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        assert_eq!(tx.kind(), TransactionKind::Optimized);
        assert_eq!(conv.count(Segment::CreateUncoordinatedTransaction), 0);

        for _ in 0..2 {
            conn.send(
                &message(Reliability::ReliablePersistent, 4),
                Some(&tx),
                &queue(),
                None,
            )
            .unwrap();
        }

        let flags: Vec<i32> = conv
            .frames_for(Segment::SendConnMessageNoReply)
            .iter()
            .map(|f| {
                let mut body = f.reader();
                body.get_i16().unwrap();
                body.get_i16().unwrap();
                body.get_i32().unwrap()
            })
            .collect();
        let base = OPTIMIZED_TX_FLAGS_TRANSACTED_BIT | OPTIMIZED_TX_FLAGS_LOCAL_BIT;
        assert_eq!(flags, vec![base | OPTIMIZED_TX_FLAGS_CREATE_BIT, base]);
    }

    #[test]
    fn test_transaction_id_released_on_drop() {
        let (conv, conn) = connect();
        let link = ClientLinkLevelState::attached(conv.as_ref()).unwrap();
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        let id = tx.transaction_id().unwrap();
        assert!(link.transaction_ids().is_live(id));

        drop(tx);
        assert!(!link.transaction_ids().is_live(id));
    }
}

// ============================================================================
// Strict redelivery
// ============================================================================

mod strict_redelivery {
    use super::*;

    #[test]
    fn test_rollback_notifies_every_consumer() {
        let (_conv, conn) = connect_with(HandshakeProperties::default(), strict_config());
        let tx = conn.create_uncoordinated_transaction(false).unwrap();

        let first = ReadAheadConsumer::new();
        let failing = Arc::new(FailingListener {
            calls: AtomicUsize::new(0),
        });
        let third = ReadAheadConsumer::new();
        for consumer in [&first, &third] {
            consumer.enqueue(ReceivedMessage::new(1, b"a".to_vec())).unwrap();
            consumer.enqueue(ReceivedMessage::new(2, b"b".to_vec())).unwrap();
        }

        first.receive(Some(&tx)).unwrap();
        tx.register_redelivery_consumer(failing.clone());
        third.receive(Some(&tx)).unwrap();

        tx.rollback().unwrap();
        assert_eq!(first.purge_count(), 1);
        assert_eq!(first.buffered(), 0);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.purge_count(), 1);
        assert_eq!(third.buffered(), 0);
        assert_eq!(tx.core().redelivery_count(), 0);
    }

    #[test]
    fn test_commit_leaves_buffers_alone() {
        let (_conv, conn) = connect_with(HandshakeProperties::default(), strict_config());
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        let consumer = ReadAheadConsumer::new();
        consumer.enqueue(ReceivedMessage::new(1, vec![])).unwrap();
        consumer.enqueue(ReceivedMessage::new(2, vec![])).unwrap();

        consumer.receive(Some(&tx)).unwrap();
        tx.commit().unwrap();
        assert_eq!(consumer.purge_count(), 0);
        assert_eq!(consumer.buffered(), 1);
    }

    #[test]
    fn test_lenient_ordering_does_not_register() {
        let (_conv, conn) = connect();
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        let consumer = ReadAheadConsumer::new();
        consumer.enqueue(ReceivedMessage::new(1, vec![])).unwrap();
        consumer.enqueue(ReceivedMessage::new(2, vec![])).unwrap();

        consumer.receive(Some(&tx)).unwrap();
        tx.rollback().unwrap();
        assert_eq!(consumer.purge_count(), 0);
        assert_eq!(consumer.buffered(), 1);
    }

    #[test]
    fn test_connection_setter_enables_registration() {
        let (_conv, conn) = connect();
        conn.set_strict_redelivery_ordering(true);
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        assert!(tx.strict_redelivery_ordering());

        let consumer = ReadAheadConsumer::new();
        consumer.receive(Some(&tx)).unwrap();
        assert_eq!(tx.core().redelivery_count(), 1);
    }

    #[test]
    fn test_receive_under_completed_transaction_is_rejected() {
        let (_conv, conn) = connect();
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        tx.commit().unwrap();
        let consumer = ReadAheadConsumer::new();
        assert!(matches!(
            consumer.receive(Some(&tx)),
            Err(CommsError::IncorrectCall(_))
        ));
    }
}

// ============================================================================
// Send path
// ============================================================================

mod send_path {
    use super::*;

    fn chunking_config() -> ClientConfig {
        ClientConfig {
            chunking_threshold_bytes: 8,
            ..ClientConfig::default()
        }
    }

    fn sliced(reliability: Reliability) -> OutboundMessage {
        OutboundMessage::new(reliability, vec![vec![1; 4], vec![2; 4], vec![3; 4]])
    }

    /// Flags byte of a chunk frame sent without a transaction
    fn chunk_flag(frame: &corelink_wire::testing::RecordedFrame) -> u8 {
        let mut body = frame.reader();
        body.get_i16().unwrap();
        body.get_i16().unwrap();
        body.get_i32().unwrap();
        body.get_u8().unwrap()
    }

    #[test]
    fn test_reliable_whole_message_is_exchanged() {
        let (conv, conn) = connect();
        conn.send(&message(Reliability::ReliablePersistent, 4), None, &queue(), None)
            .unwrap();
        let frames = conv.frames_for(Segment::SendConnMessage);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].exchanged);
        assert_eq!(frames[0].priority, Priority(6));
    }

    #[test]
    fn test_express_whole_message_is_fire_and_forget() {
        let (conv, conn) = connect();
        conn.send(&message(Reliability::ExpressNonPersistent, 4), None, &queue(), None)
            .unwrap();
        assert_eq!(conv.count(Segment::SendConnMessage), 0);
        assert_eq!(conv.count(Segment::SendConnMessageNoReply), 1);
    }

    #[test]
    fn test_transacted_send_waits_only_when_configured() {
        let (conv, conn) = connect_with(
            HandshakeProperties::default(),
            ClientConfig {
                exchange_transacted_sends: true,
                ..ClientConfig::default()
            },
        );
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        conn.send(&message(Reliability::ReliablePersistent, 4), Some(&tx), &queue(), None)
            .unwrap();
        assert_eq!(conv.count(Segment::SendConnMessage), 1);
    }

    #[test]
    fn test_large_reliable_message_is_chunked() {
        let (conv, conn) = connect_with(HandshakeProperties::default(), chunking_config());
        conn.send(&sliced(Reliability::AssuredPersistent), None, &queue(), None)
            .unwrap();

        let leading = conv.frames_for(Segment::SendChunkedConnMessageNoReply);
        let last = conv.frames_for(Segment::SendChunkedConnMessage);
        assert_eq!(leading.len(), 2);
        assert_eq!(last.len(), 1);
        assert!(last[0].exchanged);
        assert_eq!(chunk_flag(&leading[0]), CHUNKED_MESSAGE_FIRST);
        assert_eq!(chunk_flag(&leading[1]), CHUNKED_MESSAGE_MIDDLE);
        assert_eq!(chunk_flag(&last[0]), CHUNKED_MESSAGE_LAST);
        assert_eq!(conv.count(Segment::SendConnMessage), 0);
    }

    #[test]
    fn test_large_express_message_never_waits() {
        let (conv, conn) = connect_with(HandshakeProperties::default(), chunking_config());
        conn.send(&sliced(Reliability::ExpressNonPersistent), None, &queue(), None)
            .unwrap();
        assert_eq!(conv.count(Segment::SendChunkedConnMessageNoReply), 3);
        assert_eq!(conv.count(Segment::SendChunkedConnMessage), 0);
    }

    #[test]
    fn test_only_first_slice_creates_optimized_transaction() {
        let (conv, conn) = connect_with(
            HandshakeProperties {
                requires_optimized_transactions: true,
                ..HandshakeProperties::default()
            },
            chunking_config(),
        );
        let tx = conn.create_uncoordinated_transaction(false).unwrap();
        conn.send(&sliced(Reliability::ReliablePersistent), Some(&tx), &queue(), None)
            .unwrap();

        let creates: Vec<bool> = conv
            .frames_for(Segment::SendChunkedConnMessageNoReply)
            .iter()
            .map(|f| {
                let mut body = f.reader();
                body.get_i16().unwrap();
                body.get_i16().unwrap();
                body.get_i32().unwrap() & OPTIMIZED_TX_FLAGS_CREATE_BIT != 0
            })
            .collect();
        assert_eq!(creates, vec![true, false, false]);
    }

    #[test]
    fn test_remote_failure_on_exchange_is_typed() {
        let (conv, conn) = connect();
        conv.script_exception(
            Segment::SendConnMessage,
            corelink_wire::RemoteException::new(
                corelink_wire::exception::SI_NOT_AUTHORISED_EXCEPTION,
                "not allowed to send to orders",
            ),
        );
        let result = conn.send(&message(Reliability::ReliablePersistent, 4), None, &queue(), None);
        assert!(matches!(result, Err(CommsError::NotAuthorized(_))));
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[derive(Default)]
    struct Events {
        seen: Mutex<Vec<String>>,
    }

    impl ConnectionListener for Events {
        fn async_exception(&self, error: &CommsError) -> ListenerResult {
            self.seen.lock().push(format!("async {}", error));
            Ok(())
        }

        fn connection_lost(&self, error: &CommsError) -> ListenerResult {
            self.seen.lock().push(format!("lost {}", error));
            Ok(())
        }
    }

    impl MessageListener for Events {
        fn consume_messages(&self, messages: &[ReceivedMessage]) -> ListenerResult {
            self.seen
                .lock()
                .push(format!("messages {}", messages.len()));
            Ok(())
        }
    }

    #[test]
    fn test_close_makes_everything_unavailable() {
        let (conv, conn) = connect();
        let context = conn.create_ordering_context().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        assert_eq!(conv.count(Segment::CloseConnection), 1);

        assert!(matches!(
            conn.send(&message(Reliability::ReliablePersistent, 4), None, &queue(), None),
            Err(CommsError::ConnectionUnavailable(_))
        ));
        assert!(matches!(
            conn.create_ordering_context(),
            Err(CommsError::ConnectionUnavailable(_))
        ));
        assert!(matches!(
            conn.create_uncoordinated_transaction(false),
            Err(CommsError::ConnectionUnavailable(_))
        ));
        assert!(matches!(
            context.bind(),
            Err(CommsError::ConnectionUnavailable(_))
        ));
        assert!(conn.me_uuid().is_none());

        // Closing again is a no-op
        conn.close().unwrap();
        assert_eq!(conv.count(Segment::CloseConnection), 1);
    }

    #[test]
    fn test_close_over_broken_link_succeeds() {
        let (conv, conn) = connect();
        conv.break_link("socket reset");
        conn.close().unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn test_listeners_receive_events() {
        let (_conv, conn) = connect();
        let events = Arc::new(Events::default());
        conn.add_connection_listener(events.clone());

        conn.deliver_messages(
            events.clone(),
            vec![ReceivedMessage::new(1, vec![]), ReceivedMessage::new(2, vec![])],
        )
        .unwrap();
        conn.dispatcher().drain();
        conn.report_async_exception(CommsError::CoreError("store full".into()))
            .unwrap();
        conn.dispatcher().drain();
        conn.report_connection_lost(CommsError::ConnectionLost("socket reset".into()))
            .unwrap();
        conn.dispatcher().drain();

        assert_eq!(
            events.seen.lock().as_slice(),
            &[
                "messages 2".to_string(),
                "async Core error: store full".to_string(),
                "lost Connection lost: socket reset".to_string(),
            ]
        );
        assert!(conn.is_closed());
        assert_eq!(conn.synchronizer().counts(), (0, 0));
    }

    #[test]
    fn test_strict_ordering_from_config() {
        let (_conv, conn) = connect_with(HandshakeProperties::default(), strict_config());
        assert!(conn.strict_redelivery_ordering());
        conn.set_strict_redelivery_ordering(false);
        assert!(!conn.strict_redelivery_ordering());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let conv = Arc::new(RecordingConversation::with_defaults());
        let result = Connection::with_own_pool(
            conv,
            ClientConfig {
                dispatch_threads: 0,
                ..ClientConfig::default()
            },
        );
        assert!(matches!(
            result,
            Err(CommsError::NotPossibleInCurrentConfiguration(_))
        ));
    }
}
