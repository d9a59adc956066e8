//! Two-group callback mutex
//!
//! Asynchronous message delivery and asynchronous exception delivery both call
//! into application code. If both ran at once, an application that
//! synchronizes inside its listeners could deadlock against the consumer it is
//! being told about. The synchronizer lets any number of callbacks of one
//! group run together and never lets the two groups overlap.
//!
//! ## Invariant
//!
//! `message > 0` implies `exception == 0`, and vice versa.
//!
//! ## Usage
//!
//! ```text
//! let _guard = sync.enter_message();   // blocks while exceptions are delivered
//! listener.consume_messages(...);
//! // guard drop -> exit_message, wakes blocked exception entrants at zero
//! ```

use corelink_core::{CommsError, CommsResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use tracing::error;

/// Callback group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackGroup {
    /// Asynchronous message delivery
    Message,
    /// Asynchronous exception delivery
    Exception,
}

impl fmt::Display for CallbackGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackGroup::Message => f.write_str("message"),
            CallbackGroup::Exception => f.write_str("exception"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    message: usize,
    exception: usize,
}

impl Counts {
    fn own(&mut self, group: CallbackGroup) -> &mut usize {
        match group {
            CallbackGroup::Message => &mut self.message,
            CallbackGroup::Exception => &mut self.exception,
        }
    }

    fn opposing(&self, group: CallbackGroup) -> usize {
        match group {
            CallbackGroup::Message => self.exception,
            CallbackGroup::Exception => self.message,
        }
    }
}

/// Per-connection group mutex for application callbacks
#[derive(Debug, Default)]
pub struct CallbackSynchronizer {
    counts: Mutex<Counts>,
    changed: Condvar,
}

impl CallbackSynchronizer {
    /// Create an idle synchronizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no exception callback runs, then join the message group
    pub fn enter_message(&self) -> CallbackGuard<'_> {
        self.enter(CallbackGroup::Message);
        CallbackGuard {
            sync: self,
            group: CallbackGroup::Message,
        }
    }

    /// Block until no message callback runs, then join the exception group
    pub fn enter_exception(&self) -> CallbackGuard<'_> {
        self.enter(CallbackGroup::Exception);
        CallbackGuard {
            sync: self,
            group: CallbackGroup::Exception,
        }
    }

    /// Leave the message group
    ///
    /// Only needed when a guard was released with [`CallbackGuard::detach`].
    pub fn exit_message(&self) -> CommsResult<()> {
        self.exit(CallbackGroup::Message)
    }

    /// Leave the exception group
    ///
    /// Only needed when a guard was released with [`CallbackGuard::detach`].
    pub fn exit_exception(&self) -> CommsResult<()> {
        self.exit(CallbackGroup::Exception)
    }

    /// Current (message, exception) member counts
    pub fn counts(&self) -> (usize, usize) {
        let counts = self.counts.lock();
        (counts.message, counts.exception)
    }

    /// Join `group`, blocking while the opposing group has members
    pub fn enter(&self, group: CallbackGroup) {
        let mut counts = self.counts.lock();
        // Spurious wakeups fall through to another check
        while counts.opposing(group) > 0 {
            self.changed.wait(&mut counts);
        }
        *counts.own(group) += 1;
    }

    /// Leave `group`; an exit without a matching enter is rejected
    pub fn exit(&self, group: CallbackGroup) -> CommsResult<()> {
        let mut counts = self.counts.lock();
        let own = counts.own(group);
        if *own == 0 {
            return Err(CommsError::IncorrectCall(format!(
                "exit from the {} group without a matching enter",
                group
            )));
        }
        *own -= 1;
        if *own == 0 {
            self.changed.notify_all();
        }
        Ok(())
    }
}

/// Membership of one callback group, released on drop
#[must_use = "dropping the guard leaves the group immediately"]
pub struct CallbackGuard<'a> {
    sync: &'a CallbackSynchronizer,
    group: CallbackGroup,
}

impl CallbackGuard<'_> {
    /// Group this guard belongs to
    pub fn group(&self) -> CallbackGroup {
        self.group
    }

    /// Keep the membership past the guard's lifetime; the caller must exit
    /// the group explicitly.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sync.exit(self.group) {
            error!(group = %self.group, error = %e, "Callback guard released twice");
        }
    }
}
