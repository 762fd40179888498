//! Event Binding Layer.
//!
//! Listeners are declared as `name.modifier` spec strings, e.g.
//! `keyup.enter`, `click.prevent`, `submit.prevent.stop`. Modifiers come in
//! two kinds:
//!
//! - **key filters** (`esc`, `enter`, `up`, ...) restrict a keyboard
//!   listener to specific key codes; a non-matching event skips the handler
//!   entirely (no directives applied either).
//! - **directives** (`prevent`, `stop`, `stop_all`) are applied to the
//!   event object when the handler runs.
//!
//! Keyboard events (`keyup`, `keypress`, `keydown`) are global: they attach
//! to the host document instead of the component's node.
//!
//! Dispatch is where reactivity and events meet: the handler runs inside a
//! render cascade, queued microtasks drain, and then the owning component's
//! dependents and the component itself repaint. The shared cascade
//! guarantees a handler that already triggered a repaint through a reactive
//! slot does not cause a second one.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::component::{lifecycle, registry};
use crate::error::{EngineError, Result};
use crate::host::{self, EventDirectives, HostEvent};
use crate::render;
use crate::runtime;
use crate::types::{InstanceId, ListenerId, NodeKey};

// =============================================================================
// Specs
// =============================================================================

/// Events that attach to the host document rather than a component node.
pub const GLOBAL_EVENTS: [&str; 3] = ["keyup", "keypress", "keydown"];

/// A parsed `name.modifier` listener spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub name: String,
    /// Accepted key codes; empty means no key filter.
    pub key_codes: SmallVec<[u16; 2]>,
    pub directives: EventDirectives,
}

impl EventSpec {
    pub fn is_global(&self) -> bool {
        GLOBAL_EVENTS.contains(&self.name.as_str())
    }

    fn matches_key(&self, event: &HostEvent) -> bool {
        if self.key_codes.is_empty() {
            return true;
        }
        event.key_code.is_some_and(|code| self.key_codes.contains(&code))
    }
}

/// Parse a listener spec string.
pub fn parse(spec: &str) -> Result<EventSpec> {
    let mut parts = spec.split('.');
    let name = parts.next().unwrap_or_default().to_string();

    let mut key_codes: SmallVec<[u16; 2]> = SmallVec::new();
    let mut directives = EventDirectives::empty();
    for modifier in parts {
        match modifier {
            "prevent" => directives |= EventDirectives::PREVENT_DEFAULT,
            "stop" => directives |= EventDirectives::STOP_PROPAGATION,
            "stop_all" => directives |= EventDirectives::STOP_IMMEDIATE,
            "esc" => key_codes.push(27),
            "tab" => key_codes.push(9),
            "enter" => key_codes.push(13),
            "space" => key_codes.push(32),
            "up" => key_codes.push(38),
            "left" => key_codes.push(37),
            "right" => key_codes.push(39),
            "down" => key_codes.push(40),
            "delete" => key_codes.extend_from_slice(&[8, 46]),
            other => return Err(EngineError::UnknownEventModifier(other.to_string())),
        }
    }

    Ok(EventSpec {
        name,
        key_codes,
        directives,
    })
}

// =============================================================================
// Listener Registry
// =============================================================================

/// Handler signature for bound event listeners.
pub type EventHandlerFn = Rc<dyn Fn(InstanceId, &HostEvent) -> Result<()>>;

struct Listener {
    owner: InstanceId,
    node: NodeKey,
    spec: EventSpec,
    f: EventHandlerFn,
}

thread_local! {
    static LISTENERS: RefCell<Vec<Option<Listener>>> = const { RefCell::new(Vec::new()) };
}

/// Bind a listener for `owner` on `node` (or the document for global
/// events) and register it with the host.
pub fn attach(owner: InstanceId, node: NodeKey, spec: EventSpec, f: EventHandlerFn) -> ListenerId {
    let target = if spec.is_global() {
        host::with(|h| h.document())
    } else {
        node
    };
    let id = LISTENERS.with(|l| {
        let mut listeners = l.borrow_mut();
        listeners.push(Some(Listener {
            owner,
            node: target,
            spec: spec.clone(),
            f,
        }));
        listeners.len() - 1
    });
    host::with(|h| h.add_event_listener(target, &spec.name, id));
    id
}

/// Unbind a listener and remove it from the host.
pub fn detach(id: ListenerId) {
    let removed = LISTENERS.with(|l| l.borrow_mut().get_mut(id).and_then(Option::take));
    if let Some(listener) = removed {
        host::with(|h| h.remove_event_listener(listener.node, &listener.spec.name, id));
    }
}

/// Clear all bound listeners (for testing).
pub fn reset_events_state() {
    LISTENERS.with(|l| l.borrow_mut().clear());
}

// =============================================================================
// Dispatch
// =============================================================================

/// Deliver `event` at `node` and bubble it toward the document root.
///
/// Listeners run in binding order per node. A `stop_all` listener halts the
/// remaining listeners on its own node too; `stop` only halts bubbling.
pub fn emit(node: NodeKey, event: &HostEvent) {
    // Snapshot the ancestor chain first; handlers may mutate the tree.
    let mut chain: Vec<NodeKey> = vec![node];
    let mut current = node;
    while let Some(parent) = host::with(|h| h.parent_of(current)) {
        chain.push(parent);
        current = parent;
    }

    'bubble: for &target in &chain {
        let ids: Vec<ListenerId> = LISTENERS.with(|l| {
            l.borrow()
                .iter()
                .enumerate()
                .filter_map(|(id, slot)| {
                    slot.as_ref()
                        .filter(|listener| {
                            listener.node == target && listener.spec.name == event.name
                        })
                        .map(|_| id)
                })
                .collect()
        });

        for id in ids {
            dispatch(id, event);
            let applied = event.applied.get();
            if applied.contains(EventDirectives::STOP_IMMEDIATE) {
                break 'bubble;
            }
        }
        if event.applied.get().contains(EventDirectives::STOP_PROPAGATION) {
            break;
        }
    }
}

/// Run one bound listener against `event`.
///
/// The handler, the microtask drain, and the post-dispatch repaint of the
/// owner and its dependents all share one render cascade.
pub fn dispatch(id: ListenerId, event: &HostEvent) {
    let Some((owner, spec, f)) = LISTENERS.with(|l| {
        l.borrow().get(id).and_then(|slot| {
            slot.as_ref()
                .map(|listener| (listener.owner, listener.spec.clone(), Rc::clone(&listener.f)))
        })
    }) else {
        return;
    };

    if !spec.matches_key(event) {
        return;
    }
    event.applied.set(event.applied.get() | spec.directives);

    render::begin_cascade();

    if let Err(err) = f(owner, event) {
        tracing::error!(event = %event.name, instance = owner, %err, "event handler failed");
    }

    runtime::drain_microtasks();

    for dependent in registry::dependents_of(owner) {
        lifecycle::render_component(dependent);
    }
    lifecycle::render_component(owner);

    render::end_cascade();
}

// =============================================================================
// Tests
// =============================================================================
