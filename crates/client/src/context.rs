//! Connection state shared with every proxy the connection creates

use crate::config::ClientConfig;
use crate::conversation_state::ClientConversationState;
use crate::link::ClientLinkLevelState;
use corelink_core::{CommsError, CommsResult, ConnectionObjectId, FapLevel};
use corelink_wire::Conversation;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct ConnectionContext {
    conversation: Arc<dyn Conversation>,
    link: Arc<ClientLinkLevelState>,
    conversation_state: Arc<ClientConversationState>,
    config: ClientConfig,
    closed: AtomicBool,
    strict_redelivery_ordering: AtomicBool,
}

impl ConnectionContext {
    pub(crate) fn new(conversation: Arc<dyn Conversation>, config: ClientConfig) -> CommsResult<Self> {
        let link = ClientLinkLevelState::attached(conversation.as_ref())?;
        let conversation_state = ClientConversationState::attached(conversation.as_ref())?;
        Ok(Self {
            strict_redelivery_ordering: AtomicBool::new(config.strict_redelivery_ordering),
            conversation,
            link,
            conversation_state,
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn conversation(&self) -> &dyn Conversation {
        self.conversation.as_ref()
    }

    pub(crate) fn link(&self) -> &Arc<ClientLinkLevelState> {
        &self.link
    }

    pub(crate) fn conversation_state(&self) -> &ClientConversationState {
        &self.conversation_state
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn connection_object_id(&self) -> ConnectionObjectId {
        self.conversation.handshake().connection_object_id
    }

    pub(crate) fn fap_level(&self) -> FapLevel {
        self.conversation.handshake().fap_level
    }

    pub(crate) fn requires_optimized_transactions(&self) -> bool {
        self.conversation.handshake().requires_optimized_transactions
    }

    pub(crate) fn strict_redelivery_ordering(&self) -> bool {
        self.strict_redelivery_ordering.load(Ordering::Acquire)
    }

    pub(crate) fn set_strict_redelivery_ordering(&self, strict: bool) {
        self.strict_redelivery_ordering.store(strict, Ordering::Release);
    }

    /// Identity of the messaging engine, or `None` once closed
    pub(crate) fn me_uuid(&self) -> Option<Uuid> {
        if self.is_closed() {
            return None;
        }
        self.conversation.handshake().me_uuid
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed; returns false if it already was
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn check_open(&self) -> CommsResult<()> {
        if self.is_closed() {
            return Err(CommsError::ConnectionUnavailable(
                "the connection has been closed".to_string(),
            ));
        }
        Ok(())
    }
}
