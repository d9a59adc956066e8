//! Concurrent tests for the callback synchronizer and dispatch pool
//!
//! These tests run real threads against one synchronizer and check that the
//! two callback groups never overlap:
//!
//! 1. **Group exclusion** - message and exception members never coexist
//! 2. **Group sharing** - members of one group do run together
//! 3. **Dispatch** - pool workers bracketing callbacks keep the invariant
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test synchronizer_tests
//! ```

use corelink_concurrency::{CallbackGroup, CallbackSynchronizer, DispatchPool};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

/// Live member counts observed from inside the callbacks
#[derive(Default)]
struct Observed {
    message: AtomicUsize,
    exception: AtomicUsize,
    violated: AtomicBool,
    max_message: AtomicUsize,
}

impl Observed {
    fn run_callback(&self, sync: &CallbackSynchronizer, group: CallbackGroup, hold: Duration) {
        let _guard = match group {
            CallbackGroup::Message => sync.enter_message(),
            CallbackGroup::Exception => sync.enter_exception(),
        };
        let (own, other) = match group {
            CallbackGroup::Message => (&self.message, &self.exception),
            CallbackGroup::Exception => (&self.exception, &self.message),
        };
        let now = own.fetch_add(1, Ordering::SeqCst) + 1;
        if group == CallbackGroup::Message {
            self.max_message.fetch_max(now, Ordering::SeqCst);
        }
        if other.load(Ordering::SeqCst) > 0 {
            self.violated.store(true, Ordering::SeqCst);
        }
        let (m, e) = sync.counts();
        if m > 0 && e > 0 {
            self.violated.store(true, Ordering::SeqCst);
        }
        thread::sleep(hold);
        own.fetch_sub(1, Ordering::SeqCst);
    }
}

fn group_for(flag: bool) -> CallbackGroup {
    if flag {
        CallbackGroup::Message
    } else {
        CallbackGroup::Exception
    }
}

// ============================================================================
// SECTION 1: Group Exclusion
// ============================================================================

mod group_exclusion {
    use super::*;

    #[test]
    fn test_groups_never_overlap_under_contention() {
        let sync = Arc::new(CallbackSynchronizer::new());
        let observed = Arc::new(Observed::default());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sync = Arc::clone(&sync);
                let observed = Arc::clone(&observed);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for round in 0..50 {
                        let group = group_for((i + round) % 2 == 0);
                        observed.run_callback(&sync, group, Duration::from_micros(50));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(!observed.violated.load(Ordering::SeqCst));
        assert_eq!(sync.counts(), (0, 0));
    }

    #[test]
    fn test_exception_waits_for_all_message_members() {
        let sync = Arc::new(CallbackSynchronizer::new());
        let first = sync.enter_message();
        let second = sync.enter_message();

        let entered = Arc::new(AtomicBool::new(false));
        let handle = {
            let sync = Arc::clone(&sync);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let _g = sync.enter_exception();
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(30));
        drop(first);
        thread::sleep(Duration::from_millis(30));
        assert!(!entered.load(Ordering::SeqCst));

        drop(second);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }
}

// ============================================================================
// SECTION 2: Group Sharing
// ============================================================================

mod group_sharing {
    use super::*;

    #[test]
    fn test_message_members_run_together() {
        let sync = Arc::new(CallbackSynchronizer::new());
        let observed = Arc::new(Observed::default());
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sync = Arc::clone(&sync);
                let observed = Arc::clone(&observed);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    observed.run_callback(&sync, CallbackGroup::Message, Duration::from_millis(50));
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(observed.max_message.load(Ordering::SeqCst) > 1);
    }
}

// ============================================================================
// SECTION 3: Dispatch
// ============================================================================

mod dispatch {
    use super::*;

    #[test]
    fn test_pool_workers_respect_groups() {
        let pool = DispatchPool::new(4, 1024).unwrap();
        let sync = Arc::new(CallbackSynchronizer::new());
        let observed = Arc::new(Observed::default());

        for i in 0..200 {
            let sync = Arc::clone(&sync);
            let observed = Arc::clone(&observed);
            pool.submit(move || {
                observed.run_callback(&sync, group_for(i % 3 != 0), Duration::from_micros(20));
            })
            .unwrap();
        }

        pool.drain();
        assert!(!observed.violated.load(Ordering::SeqCst));
        assert_eq!(pool.stats().tasks_completed, 200);
        pool.shutdown();
    }
}

// ============================================================================
// SECTION 4: Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any schedule of enter/exit calls across threads keeps the groups apart
    #[test]
    fn prop_arbitrary_schedules_keep_groups_apart(
        schedules in proptest::collection::vec(
            proptest::collection::vec(any::<bool>(), 1..20),
            2..6,
        )
    ) {
        let sync = Arc::new(CallbackSynchronizer::new());
        let observed = Arc::new(Observed::default());

        let handles: Vec<_> = schedules
            .into_iter()
            .map(|schedule| {
                let sync = Arc::clone(&sync);
                let observed = Arc::clone(&observed);
                thread::spawn(move || {
                    for flag in schedule {
                        observed.run_callback(&sync, group_for(flag), Duration::from_micros(10));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        prop_assert!(!observed.violated.load(Ordering::SeqCst));
        prop_assert_eq!(sync.counts(), (0, 0));
    }
}
