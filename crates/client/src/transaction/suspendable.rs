//! Suspend/resume over pooled branch proxies
//!
//! A transaction manager may suspend a branch on one resource and keep using
//! the same resource object for other work. The façade parks the suspended
//! `XaResourceState` under its Xid and carries on with another one, taken
//! from a free pool or created through the connection. Suspend and resume are
//! purely local; the peer sees one start and one end per branch.

use super::{
    resource_identity, EnlistmentState, RedeliveryListener, TransactionOperations, XaResource,
    XaResourceFactory, XaResourceState,
};
use corelink_core::{
    xa, CommsError, CommsResult, Priority, TransactionId, TransactionKind, XaError, XaResult, Xid,
};
use corelink_wire::TransactionReference;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

struct Facade {
    active: Option<Arc<XaResourceState>>,
    suspended: HashMap<Xid, Arc<XaResourceState>>,
    pool: Vec<Arc<XaResourceState>>,
    enlisted: bool,
}

impl Facade {
    fn release_to_pool(&mut self, resource: &Arc<XaResourceState>) {
        if !self.pool.iter().any(|pooled| Arc::ptr_eq(pooled, resource)) {
            self.pool.push(Arc::clone(resource));
        }
    }

    fn take_from_pool(&mut self, resource: &Arc<XaResourceState>) {
        self.pool.retain(|pooled| !Arc::ptr_eq(pooled, resource));
    }

    fn pop_pooled(&mut self) -> Option<Arc<XaResourceState>> {
        let index = self.pool.iter().position(|r| !r.is_suspended())?;
        Some(self.pool.swap_remove(index))
    }
}

/// XA resource supporting TMSUSPEND and TMRESUME
pub struct SuspendableResource {
    factory: Arc<dyn XaResourceFactory>,
    message_store: bool,
    facade: Mutex<Facade>,
}

impl SuspendableResource {
    /// Façade over resources created by `factory`
    ///
    /// The first resource is created immediately so connection problems
    /// surface here rather than at the first `start`.
    pub fn new(factory: Arc<dyn XaResourceFactory>, message_store: bool) -> CommsResult<Self> {
        let first = factory.create_xa_resource(message_store)?;
        Ok(Self {
            factory,
            message_store,
            facade: Mutex::new(Facade {
                active: Some(first),
                suspended: HashMap::new(),
                pool: Vec::new(),
                enlisted: false,
            }),
        })
    }

    /// Resource currently carrying the work
    pub fn active(&self) -> Option<Arc<XaResourceState>> {
        self.facade.lock().active.clone()
    }

    /// Resources waiting in the free pool
    pub fn pooled_count(&self) -> usize {
        self.facade.lock().pool.len()
    }

    /// Branches currently suspended
    pub fn suspended_count(&self) -> usize {
        self.facade.lock().suspended.len()
    }

    /// True between a start and the matching end or suspend
    pub fn is_enlisted(&self) -> bool {
        self.facade.lock().enlisted
    }

    pub(crate) fn me_uuid(&self) -> Option<Uuid> {
        self.active().and_then(|active| active.me_uuid())
    }

    fn create(&self) -> XaResult<Arc<XaResourceState>> {
        self.factory
            .create_xa_resource(self.message_store)
            .map_err(|e| XaError::from_comms(e, "create XA resource"))
    }

    /// Active resource, creating one if none is usable
    fn current(&self) -> XaResult<Arc<XaResourceState>> {
        let mut facade = self.facade.lock();
        match &facade.active {
            Some(active) => Ok(Arc::clone(active)),
            None => {
                let resource = match facade.pop_pooled() {
                    Some(pooled) => pooled,
                    None => self.create()?,
                };
                facade.active = Some(Arc::clone(&resource));
                Ok(resource)
            }
        }
    }
}

impl XaResource for SuspendableResource {
    fn start(&self, xid: &Xid, flags: i32) -> XaResult<()> {
        let mut facade = self.facade.lock();

        if xa::has_flag(flags, xa::TMRESUME) {
            if facade.enlisted {
                return Err(XaError::proto(format!(
                    "cannot resume {} while another branch is active",
                    xid
                )));
            }
            let resumed = facade
                .suspended
                .remove(xid)
                .ok_or_else(|| XaError::nota(format!("branch {} is not suspended", xid)))?;
            resumed.set_suspended(false);
            debug!(tx_id = %resumed.transaction_id(), "Resumed XA branch");
            facade.active = Some(resumed);
            facade.enlisted = true;
            return Ok(());
        }

        let resource = match facade.active.clone() {
            Some(active) if !active.is_suspended() => {
                facade.take_from_pool(&active);
                active
            }
            _ => match facade.pop_pooled() {
                Some(pooled) => pooled,
                None => self.create()?,
            },
        };
        facade.active = Some(Arc::clone(&resource));

        resource.start(xid, flags)?;
        facade.enlisted = true;
        Ok(())
    }

    fn end(&self, xid: &Xid, flags: i32) -> XaResult<()> {
        let mut facade = self.facade.lock();

        if xa::has_flag(flags, xa::TMSUSPEND) {
            let active = match (&facade.active, facade.enlisted) {
                (Some(active), true) => Arc::clone(active),
                _ => return Err(XaError::proto("no active branch to suspend")),
            };
            active.set_suspended(true);
            debug!(tx_id = %active.transaction_id(), "Suspended XA branch");
            facade.suspended.insert(xid.clone(), active);
            facade.enlisted = false;
            return Ok(());
        }

        let mut adopted = false;
        if !facade.enlisted {
            if let Some(parked) = facade.suspended.remove(xid) {
                parked.set_suspended(false);
                facade.active = Some(parked);
                adopted = true;
            } else {
                let started = facade
                    .active
                    .as_ref()
                    .is_some_and(|active| active.current_xid().as_ref() == Some(xid) && active.is_valid());
                if !started {
                    return Err(XaError::nota(format!(
                        "branch {} is neither active nor suspended",
                        xid
                    )));
                }
            }
        }

        let active = facade
            .active
            .clone()
            .ok_or_else(|| XaError::nota(format!("no resource for branch {}", xid)))?;
        let result = active.end(xid, flags);
        if result.is_err() && active.enlistment() != EnlistmentState::Unenlisted {
            // Rejected before leaving the branch
            if adopted {
                active.set_suspended(true);
                facade.suspended.insert(xid.clone(), active);
            }
            return result;
        }
        facade.enlisted = false;
        facade.release_to_pool(&active);
        result
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()> {
        self.current()?.commit(xid, one_phase)
    }

    fn prepare(&self, xid: &Xid) -> XaResult<i32> {
        self.current()?.prepare(xid)
    }

    fn rollback(&self, xid: &Xid) -> XaResult<()> {
        self.current()?.rollback(xid)
    }

    fn forget(&self, xid: &Xid) -> XaResult<()> {
        self.current()?.forget(xid)
    }

    fn recover(&self, flags: i32) -> XaResult<Vec<Xid>> {
        self.current()?.recover(flags)
    }

    fn transaction_timeout(&self) -> XaResult<i32> {
        self.current()?.transaction_timeout()
    }

    fn set_transaction_timeout(&self, seconds: i32) -> XaResult<bool> {
        self.current()?.set_transaction_timeout(seconds)
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

impl TransactionOperations for SuspendableResource {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Suspendable
    }

    fn transaction_id(&self) -> CommsResult<TransactionId> {
        self.active()
            .map(|active| active.transaction_id())
            .ok_or_else(|| CommsError::IncorrectCall("no active XA resource".to_string()))
    }

    fn is_valid(&self) -> bool {
        let facade = self.facade.lock();
        facade.enlisted && facade.active.as_ref().is_some_and(|active| active.is_valid())
    }

    fn reference(&self) -> CommsResult<TransactionReference> {
        match self.active() {
            Some(active) => active.reference(),
            None => Err(CommsError::IncorrectCall("no active XA resource".to_string())),
        }
    }

    fn record_message_priority(&self, priority: Priority) {
        if let Some(active) = self.active() {
            active.record_message_priority(priority);
        }
    }

    fn strict_redelivery_ordering(&self) -> bool {
        self.active()
            .is_some_and(|active| active.strict_redelivery_ordering())
    }

    fn register_redelivery_consumer(&self, consumer: Arc<dyn RedeliveryListener>) {
        if let Some(active) = self.active() {
            active.register_redelivery_consumer(consumer);
        }
    }
}

impl fmt::Debug for SuspendableResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let facade = self.facade.lock();
        f.debug_struct("SuspendableResource")
            .field("active", &facade.active.as_ref().map(|a| a.transaction_id()))
            .field("suspended", &facade.suspended.len())
            .field("pooled", &facade.pool.len())
            .field("enlisted", &facade.enlisted)
            .finish()
    }
}
