//! Render Dependency Tracker.
//!
//! Renders are never scheduled; they run synchronously, and this module
//! keeps them from running twice. Two mechanisms:
//!
//! - A **render stack** of the units currently rendering. A change
//!   notification for an instance already on the stack is dropped (it is
//!   being repainted right now), and the stack is how dependents are
//!   discovered: an attribute read that happens while a *different*
//!   instance's unit is rendering records that renderer as a dependent of
//!   the attribute's owner.
//! - A **cascade set** spanning one outermost notification (or one event
//!   dispatch). Every component rendered inside the cascade is marked; a
//!   second render request for it inside the same cascade is a no-op, so a
//!   dependent that repaints a subtree does not cause the subtree to paint
//!   again.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::component::{lifecycle, registry};
use crate::types::InstanceId;

// =============================================================================
// State
// =============================================================================

/// A unit on the render stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderUnit {
    /// A component repainting itself (and its subtree).
    Component(InstanceId),
    /// A content closure of the given owner being evaluated.
    Content(InstanceId),
}

struct TrackerState {
    stack: Vec<RenderUnit>,
    /// `Some` while a cascade is open; holds every instance rendered so far.
    rendered: Option<HashSet<InstanceId>>,
    cascade_depth: usize,
}

thread_local! {
    static TRACKER: RefCell<TrackerState> = RefCell::new(TrackerState {
        stack: Vec::new(),
        rendered: None,
        cascade_depth: 0,
    });
}

// =============================================================================
// Stack
// =============================================================================

pub(crate) fn push(unit: RenderUnit) {
    TRACKER.with(|t| t.borrow_mut().stack.push(unit));
}

pub(crate) fn pop() {
    TRACKER.with(|t| {
        t.borrow_mut().stack.pop();
    });
}

fn is_rendering(instance: InstanceId) -> bool {
    TRACKER.with(|t| {
        t.borrow().stack.iter().any(|unit| match unit {
            RenderUnit::Component(i) | RenderUnit::Content(i) => *i == instance,
        })
    })
}

/// Record a cross-instance attribute read.
///
/// Called from slot reads: when the innermost rendering unit belongs to a
/// different instance than `owner`, that renderer consumed `owner`'s value
/// and is recorded as a dependent (first-recorded order, no duplicates). A
/// component reading its own attributes records nothing, and reads outside
/// any render are free.
pub(crate) fn record_read(owner: InstanceId) {
    let reader = TRACKER.with(|t| {
        t.borrow().stack.last().map(|unit| match unit {
            RenderUnit::Component(i) | RenderUnit::Content(i) => *i,
        })
    });
    if let Some(reader) = reader {
        if reader != owner {
            registry::add_dependent(owner, reader);
        }
    }
}

// =============================================================================
// Cascades
// =============================================================================

/// Open a cascade (re-entrant). Only the outermost call creates the
/// rendered set; nested opens share it.
pub(crate) fn begin_cascade() {
    TRACKER.with(|t| {
        let mut state = t.borrow_mut();
        if state.cascade_depth == 0 {
            state.rendered = Some(HashSet::new());
        }
        state.cascade_depth += 1;
    });
}

pub(crate) fn end_cascade() {
    TRACKER.with(|t| {
        let mut state = t.borrow_mut();
        state.cascade_depth = state.cascade_depth.saturating_sub(1);
        if state.cascade_depth == 0 {
            state.rendered = None;
        }
    });
}

/// Mark `instance` as rendered in the open cascade.
///
/// Returns `false` if it was already rendered (the caller skips the
/// repaint). Outside a cascade this always returns `true`.
pub(crate) fn cascade_mark(instance: InstanceId) -> bool {
    TRACKER.with(|t| {
        let mut state = t.borrow_mut();
        match &mut state.rendered {
            Some(set) => set.insert(instance),
            None => true,
        }
    })
}

// =============================================================================
// Notification
// =============================================================================

/// React to a reactive slot change on `instance`.
///
/// Dependents repaint first, in the order they were recorded, then the
/// instance itself. Everything shares one cascade, so no component paints
/// twice no matter how the dependency edges overlap.
pub fn notify_change(instance: InstanceId) {
    if is_rendering(instance) {
        return;
    }

    begin_cascade();
    for dependent in registry::dependents_of(instance) {
        lifecycle::render_component(dependent);
    }
    lifecycle::render_component(instance);
    end_cascade();
}

/// Clear all tracker state (for testing).
pub fn reset_render_state() {
    TRACKER.with(|t| {
        let mut state = t.borrow_mut();
        state.stack.clear();
        state.rendered = None;
        state.cascade_depth = 0;
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        reset_render_state();
    }

    #[test]
    fn test_stack_guard() {
        setup();
        push(RenderUnit::Component(3));
        assert!(is_rendering(3));
        assert!(!is_rendering(4));
        pop();
        assert!(!is_rendering(3));
    }

    #[test]
    fn test_cascade_marks_once() {
        setup();
        begin_cascade();
        assert!(cascade_mark(1));
        assert!(!cascade_mark(1));
        assert!(cascade_mark(2));
        end_cascade();
        // Outside a cascade marking always passes.
        assert!(cascade_mark(1));
        assert!(cascade_mark(1));
    }

    #[test]
    fn test_nested_cascades_share_one_set() {
        setup();
        begin_cascade();
        assert!(cascade_mark(1));
        begin_cascade();
        assert!(!cascade_mark(1));
        end_cascade();
        assert!(!cascade_mark(1));
        end_cascade();
        assert!(cascade_mark(1));
        reset_render_state();
    }
}
