//! Deferred work: microtasks and intervals.
//!
//! The engine is synchronous; "async" here means *deferred until a
//! well-defined drain point*, driven explicitly by the embedder. Microtasks
//! drain after every event dispatch and whenever [`advance`] ticks the
//! clock. There is no background thread and no executor.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::component::registry;
use crate::types::InstanceId;

// =============================================================================
// Microtasks
// =============================================================================

thread_local! {
    static MICROTASKS: RefCell<VecDeque<Box<dyn FnOnce()>>> = const { RefCell::new(VecDeque::new()) };
}

/// Queue a closure to run at the next drain point.
pub fn queue_microtask(f: impl FnOnce() + 'static) {
    MICROTASKS.with(|q| q.borrow_mut().push_back(Box::new(f)));
}

/// Run queued microtasks to exhaustion. Tasks queued while draining run in
/// the same drain.
pub fn drain_microtasks() {
    loop {
        let task = MICROTASKS.with(|q| q.borrow_mut().pop_front());
        match task {
            Some(task) => task(),
            None => break,
        }
    }
}

// =============================================================================
// Intervals
// =============================================================================

struct Interval {
    owner: InstanceId,
    every: u64,
    next_due: u64,
    f: Rc<dyn Fn(InstanceId)>,
}

thread_local! {
    static INTERVALS: RefCell<Vec<Option<Interval>>> = const { RefCell::new(Vec::new()) };
    static CLOCK: Cell<u64> = const { Cell::new(0) };
}

/// Handle to a registered interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalHandle {
    id: usize,
}

impl IntervalHandle {
    /// Stop the interval. Safe to call more than once.
    pub fn clear(self) {
        INTERVALS.with(|intervals| {
            if let Some(slot) = intervals.borrow_mut().get_mut(self.id) {
                *slot = None;
            }
        });
    }
}

/// Register a callback owned by `owner`, fired every `every_ticks` clock
/// ticks. The interval is NOT cleared when `owner` unmounts; a firing
/// against an unmounted owner is skipped with a warning, so a forgotten
/// handle shows up in the logs instead of touching dead state.
pub fn set_interval(owner: InstanceId, every_ticks: u64, f: impl Fn(InstanceId) + 'static) -> IntervalHandle {
    let every = every_ticks.max(1);
    let id = INTERVALS.with(|intervals| {
        let mut intervals = intervals.borrow_mut();
        intervals.push(Some(Interval {
            owner,
            every,
            next_due: CLOCK.get() + every,
            f: Rc::new(f),
        }));
        intervals.len() - 1
    });
    IntervalHandle { id }
}

/// Advance the clock by `ticks`, firing due intervals in registration order
/// and draining microtasks after each tick.
pub fn advance(ticks: u64) {
    for _ in 0..ticks {
        let now = CLOCK.get() + 1;
        CLOCK.set(now);

        let due: Vec<(usize, InstanceId, Rc<dyn Fn(InstanceId)>)> = INTERVALS.with(|intervals| {
            let mut intervals = intervals.borrow_mut();
            intervals
                .iter_mut()
                .enumerate()
                .filter_map(|(id, slot)| {
                    let interval = slot.as_mut()?;
                    if now < interval.next_due {
                        return None;
                    }
                    interval.next_due = now + interval.every;
                    Some((id, interval.owner, Rc::clone(&interval.f)))
                })
                .collect()
        });

        for (id, owner, f) in due {
            if registry::is_unmounted(owner) {
                tracing::warn!(
                    instance = owner,
                    interval = id,
                    "interval fired for an unmounted component; skipping (clear the handle)"
                );
                continue;
            }
            f(owner);
        }

        drain_microtasks();
    }
}

/// Clear the queue, all intervals, and the clock (for testing).
pub fn reset_runtime() {
    MICROTASKS.with(|q| q.borrow_mut().clear());
    INTERVALS.with(|intervals| intervals.borrow_mut().clear());
    CLOCK.set(0);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        reset_runtime();
    }

    #[test]
    fn test_microtasks_drain_in_order() {
        setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = log.clone();
        let b = log.clone();
        queue_microtask(move || a.borrow_mut().push(1));
        queue_microtask(move || b.borrow_mut().push(2));

        drain_microtasks();
        assert_eq!(*log.borrow(), vec![1, 2]);
        // Queue is now empty.
        drain_microtasks();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_microtask_can_queue_microtask() {
        setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        queue_microtask(move || {
            outer.borrow_mut().push("outer");
            let inner = outer.clone();
            queue_microtask(move || inner.borrow_mut().push("inner"));
        });

        drain_microtasks();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_interval_cadence_and_clear() {
        setup();
        crate::component::registry::reset_registry_state();
        let fired = Rc::new(Cell::new(0));
        let fired_clone = fired.clone();
        // Owner 0 does not exist in the registry; nonexistent instances are
        // not treated as unmounted.
        let handle = set_interval(0, 3, move |_| fired_clone.set(fired_clone.get() + 1));

        advance(2);
        assert_eq!(fired.get(), 0);
        advance(1);
        assert_eq!(fired.get(), 1);
        advance(6);
        assert_eq!(fired.get(), 3);

        handle.clear();
        advance(10);
        assert_eq!(fired.get(), 3);
    }
}
