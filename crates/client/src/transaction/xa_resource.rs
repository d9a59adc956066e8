//! One XA branch proxy
//!
//! ## States
//!
//! ```text
//!              start (no JOIN)             end
//! Unenlisted ------------------> Enlisted ------> Unenlisted
//!      |                                              ^
//!      |  start (JOIN, Xid registered on the link)    |
//!      +-------------------------> Joined ------------+
//!                                           end
//! ```
//!
//! ## Join groups
//!
//! The resource that starts a branch without TMJOIN is its primary and is
//! registered in the link's Xid map. Resources joining the branch attach to
//! the primary and never talk to the peer about start or end. The single
//! network end is sent, with the primary's transaction id, once the primary
//! has ended and every member has detached, whichever of those happens last.

use super::{
    resource_identity, RedeliveryListener, TransactionCore, TransactionOperations, XaResource,
};
use crate::context::ConnectionContext;
use corelink_core::{
    xa, CommsResult, Priority, TransactionId, TransactionKind, XaError, XaResult, Xid,
};
use corelink_wire::xa::{
    decode_prepare_vote, decode_recover, decode_set_transaction_timeout,
    decode_transaction_timeout,
};
use corelink_wire::{
    OptimizedReference, ReplyFrame, RequestFrame, Segment, TransactionReference, XaFrameEncoder,
};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// Enlistment of an XA branch proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnlistmentState {
    /// Not associated with a branch
    Unenlisted,
    /// Started a branch and is its primary
    Enlisted,
    /// Joined a branch started by another resource on the link
    Joined,
}

struct Branch {
    state: EnlistmentState,
    xid: Option<Xid>,
    joined_to: Option<Arc<XaResourceState>>,
    members: HashSet<TransactionId>,
    end_called: bool,
    end_forwarded: bool,
    end_flags: i32,
    member_failed: bool,
    suspended: bool,
}

impl Branch {
    fn new() -> Self {
        Self {
            state: EnlistmentState::Unenlisted,
            xid: None,
            joined_to: None,
            members: HashSet::new(),
            end_called: false,
            end_forwarded: false,
            end_flags: xa::TMNOFLAGS,
            member_failed: false,
            suspended: false,
        }
    }

    /// End flags to forward once the group has ended, if it now has
    fn take_forward(&mut self) -> Option<i32> {
        if self.end_called && !self.end_forwarded && self.members.is_empty() {
            self.end_forwarded = true;
            let flags = if self.member_failed {
                xa::TMFAIL
            } else {
                self.end_flags
            };
            return Some(flags);
        }
        None
    }
}

/// XA branch proxy bound to one connection
pub struct XaResourceState {
    core: TransactionCore,
    context: Arc<ConnectionContext>,
    encoder: XaFrameEncoder,
    kind: TransactionKind,
    message_store: bool,
    branch: Mutex<Branch>,
    me: Weak<XaResourceState>,
}

impl XaResourceState {
    /// Build a resource; plain resources open themselves on the peer
    pub(crate) fn create(
        context: Arc<ConnectionContext>,
        message_store: bool,
    ) -> CommsResult<Arc<Self>> {
        context.check_open()?;
        let core = TransactionCore::new(
            Arc::clone(context.link()),
            context.conversation().conversation_id(),
        )?;
        let kind = if context.requires_optimized_transactions() {
            TransactionKind::Optimized
        } else {
            TransactionKind::Plain
        };
        let encoder = XaFrameEncoder::new(core.id(), context.fap_level(), message_store);

        if kind == TransactionKind::Plain {
            let mut reply = context.conversation().exchange(
                encoder.open(context.connection_object_id()),
                Segment::XaOpen,
                Priority::MEDIUM,
                true,
            )?;
            reply.check_completion(Segment::XaOpen)?;
        }
        debug!(tx_id = %core.id(), kind = ?kind, message_store, "Created XA resource");

        Ok(Arc::new_cyclic(|me| Self {
            core,
            context,
            encoder,
            kind,
            message_store,
            branch: Mutex::new(Branch::new()),
            me: me.clone(),
        }))
    }

    /// Link-unique id of this proxy
    pub fn transaction_id(&self) -> TransactionId {
        self.core.id()
    }

    /// Shared state of the proxy
    pub fn core(&self) -> &TransactionCore {
        &self.core
    }

    /// Plain or Optimized
    pub fn resource_kind(&self) -> TransactionKind {
        self.kind
    }

    /// True for a message-store resource
    pub fn is_message_store(&self) -> bool {
        self.message_store
    }

    /// Current enlistment
    pub fn enlistment(&self) -> EnlistmentState {
        self.branch.lock().state
    }

    /// Branch currently associated with this resource
    pub fn current_xid(&self) -> Option<Xid> {
        self.branch.lock().xid.clone()
    }

    /// True after `end` until the next `start`
    pub fn end_called(&self) -> bool {
        self.branch.lock().end_called
    }

    /// Resources currently joined to this one
    pub fn member_count(&self) -> usize {
        self.branch.lock().members.len()
    }

    /// True while parked by a suspend
    pub fn is_suspended(&self) -> bool {
        self.branch.lock().suspended
    }

    pub(crate) fn set_suspended(&self, suspended: bool) {
        self.branch.lock().suspended = suspended;
    }

    pub(crate) fn me_uuid(&self) -> Option<Uuid> {
        self.context.me_uuid()
    }

    fn exchange(&self, request: RequestFrame, segment: Segment, priority: Priority) -> XaResult<ReplyFrame> {
        let operation = segment.name();
        self.context
            .check_open()
            .map_err(|e| XaError::from_comms(e, operation))?;
        let mut reply = self
            .context
            .conversation()
            .exchange(request, segment, priority, true)
            .map_err(|e| XaError::from_comms(e, operation))?;
        reply
            .check_completion(segment)
            .map_err(|e| XaError::from_comms(e, operation))?;
        Ok(reply)
    }

    fn start_join(&self, xid: &Xid) -> XaResult<()> {
        let primary = self
            .context
            .link()
            .xids()
            .primary(xid)
            .ok_or_else(|| XaError::inval(format!("no branch {} to join on this link", xid)))?;
        if std::ptr::eq(primary.as_ref(), self) {
            return Err(XaError::proto("a resource cannot join its own branch"));
        }

        {
            let mut group = primary.branch.lock();
            if group.end_forwarded {
                return Err(XaError::inval(format!("branch {} has already ended", xid)));
            }
            group.members.insert(self.core.id());
        }

        let mut branch = self.branch.lock();
        branch.state = EnlistmentState::Joined;
        branch.xid = Some(xid.clone());
        branch.joined_to = Some(Arc::clone(&primary));
        branch.end_called = false;
        debug!(
            tx_id = %self.core.id(),
            primary = %primary.core.id(),
            "Joined XA branch"
        );
        Ok(())
    }

    fn start_primary(&self, xid: &Xid, flags: i32) -> XaResult<()> {
        {
            let branch = self.branch.lock();
            if !branch.members.is_empty() {
                return Err(XaError::proto(format!(
                    "{} resources are still joined to the previous branch",
                    branch.members.len()
                )));
            }
        }

        self.exchange(
            self.encoder.start(xid, flags),
            Segment::XaStart,
            Priority::MEDIUM,
        )?;

        {
            let mut branch = self.branch.lock();
            branch.state = EnlistmentState::Enlisted;
            branch.xid = Some(xid.clone());
            branch.end_called = false;
            branch.end_forwarded = false;
            branch.end_flags = xa::TMNOFLAGS;
            branch.member_failed = false;
        }
        self.core.reset_server_created();

        match self.me.upgrade() {
            Some(me) => self.context.link().xids().register(xid.clone(), me),
            None => warn!(tx_id = %self.core.id(), "XA resource started while being dropped"),
        }
        Ok(())
    }

    /// Send the group's single network end on behalf of `self` as primary
    fn forward_end(&self, xid: &Xid, flags: i32) -> XaResult<()> {
        debug!(tx_id = %self.core.id(), flags, "Forwarding XA end");
        let result = self
            .exchange(self.encoder.end(xid, flags), Segment::XaEnd, Priority::MEDIUM)
            .map(|_| ());
        self.context.link().xids().remove(xid, self);
        result
    }
}

impl XaResource for XaResourceState {
    fn start(&self, xid: &Xid, flags: i32) -> XaResult<()> {
        debug!(tx_id = %self.core.id(), flags, "XA start");
        if self.branch.lock().state != EnlistmentState::Unenlisted {
            return Err(XaError::proto(format!(
                "{} is already associated with a branch",
                self.core.id()
            )));
        }

        if xa::has_flag(flags, xa::TMJOIN) {
            self.start_join(xid)
        } else {
            self.start_primary(xid, flags)
        }
    }

    fn end(&self, xid: &Xid, flags: i32) -> XaResult<()> {
        debug!(tx_id = %self.core.id(), flags, "XA end");
        let (joined_to, forward) = {
            let mut branch = self.branch.lock();
            if branch.state == EnlistmentState::Unenlisted {
                return Err(XaError::proto(format!(
                    "{} is not associated with a branch",
                    self.core.id()
                )));
            }
            if branch.xid.as_ref() != Some(xid) {
                return Err(XaError::nota(format!(
                    "{} is not associated with branch {}",
                    self.core.id(),
                    xid
                )));
            }

            let joined_to = branch.joined_to.take();
            branch.state = EnlistmentState::Unenlisted;
            branch.end_called = true;
            let forward = if joined_to.is_none() {
                branch.end_flags = flags;
                branch.take_forward()
            } else {
                None
            };
            (joined_to, forward)
        };

        match joined_to {
            Some(primary) => {
                let forward = {
                    let mut group = primary.branch.lock();
                    group.members.remove(&self.core.id());
                    if xa::has_flag(flags, xa::TMFAIL) {
                        group.member_failed = true;
                    }
                    group.take_forward()
                };
                match forward {
                    Some(group_flags) => primary.forward_end(xid, group_flags),
                    None => Ok(()),
                }
            }
            None => match forward {
                Some(group_flags) => self.forward_end(xid, group_flags),
                None => {
                    debug!(
                        tx_id = %self.core.id(),
                        members = self.member_count(),
                        "XA end deferred until joined resources end"
                    );
                    Ok(())
                }
            },
        }
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()> {
        let priority = self.core.completion_priority();
        debug!(tx_id = %self.core.id(), one_phase, priority = %priority, "XA commit");
        let result = self
            .exchange(self.encoder.commit(xid, one_phase), Segment::XaCommit, priority)
            .map(|_| ());
        self.core.completed(false);
        result
    }

    fn prepare(&self, xid: &Xid) -> XaResult<i32> {
        let mut reply = self.exchange(self.encoder.prepare(xid), Segment::XaPrepare, Priority::MEDIUM)?;
        let vote = decode_prepare_vote(&mut reply).map_err(|e| XaError::from_comms(e, "prepare"))?;
        debug!(tx_id = %self.core.id(), vote, "XA prepare");
        Ok(vote)
    }

    fn rollback(&self, xid: &Xid) -> XaResult<()> {
        let priority = self.core.completion_priority();
        debug!(tx_id = %self.core.id(), priority = %priority, "XA rollback");
        let result = self
            .exchange(self.encoder.rollback(xid), Segment::XaRollback, priority)
            .map(|_| ());
        self.core.completed(true);
        result
    }

    fn forget(&self, xid: &Xid) -> XaResult<()> {
        self.exchange(self.encoder.forget(xid), Segment::XaForget, Priority::MEDIUM)
            .map(|_| ())
    }

    fn recover(&self, flags: i32) -> XaResult<Vec<Xid>> {
        let mut reply = self.exchange(self.encoder.recover(flags), Segment::XaRecover, Priority::MEDIUM)?;
        decode_recover(&mut reply).map_err(|e| XaError::from_comms(e, "recover"))
    }

    fn transaction_timeout(&self) -> XaResult<i32> {
        let mut reply = self.exchange(
            self.encoder.get_transaction_timeout(),
            Segment::XaGetTxTimeout,
            Priority::MEDIUM,
        )?;
        decode_transaction_timeout(&mut reply)
            .map_err(|e| XaError::from_comms(e, "get transaction timeout"))
    }

    fn set_transaction_timeout(&self, seconds: i32) -> XaResult<bool> {
        let mut reply = self.exchange(
            self.encoder.set_transaction_timeout(seconds),
            Segment::XaSetTxTimeout,
            Priority::MEDIUM,
        )?;
        decode_set_transaction_timeout(&mut reply)
            .map_err(|e| XaError::from_comms(e, "set transaction timeout"))
    }

    fn is_same_rm(&self, other: &dyn XaResource) -> XaResult<bool> {
        Ok(match (self.me_uuid(), resource_identity(other)) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TransactionOperations for XaResourceState {
    fn kind(&self) -> TransactionKind {
        self.kind
    }

    fn transaction_id(&self) -> CommsResult<TransactionId> {
        Ok(self.core.id())
    }

    fn is_valid(&self) -> bool {
        let branch = self.branch.lock();
        branch.state != EnlistmentState::Unenlisted && !branch.suspended
    }

    fn reference(&self) -> CommsResult<TransactionReference> {
        Ok(match self.kind {
            TransactionKind::Optimized => {
                let xid = self.current_xid();
                TransactionReference::Optimized(OptimizedReference {
                    local: false,
                    create: self.core.take_create(),
                    subordinates_allowed: false,
                    creating_conversation_id: self.core.creating_conversation_id(),
                    transaction_id: self.core.id(),
                    xid,
                    end_previous: None,
                })
            }
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

impl fmt::Debug for XaResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let branch = self.branch.lock();
        f.debug_struct("XaResourceState")
            .field("tx_id", &self.core.id())
            .field("kind", &self.kind)
            .field("state", &branch.state)
            .field("members", &branch.members.len())
            .field("end_called", &branch.end_called)
            .field("suspended", &branch.suspended)
            .finish()
    }
}
