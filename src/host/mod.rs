//! Host Tree Adapter - the boundary between the engine and the visual tree.
//!
//! The core never manipulates a real DOM (or any concrete scene graph)
//! directly. Everything goes through the [`HostTree`] trait: element/text
//! creation, indexed insertion, attribute writes, and listener registration.
//! One host is installed per thread; [`with`] installs the in-memory
//! reference host automatically if none was provided, which keeps tests and
//! examples free of setup boilerplate.

use std::any::Any;
use std::cell::{Cell, RefCell};

use bitflags::bitflags;

use crate::error::Result;
use crate::types::{ListenerId, NodeKey, Value};

mod memory;

pub use memory::{HostOp, MemoryHost};

// =============================================================================
// Events
// =============================================================================

bitflags! {
    /// Raw propagation directives applied by the event-binding layer.
    ///
    /// These are applied to the event object before the handler runs; the
    /// host (or the test driver) reads them back after dispatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventDirectives: u8 {
        const PREVENT_DEFAULT = 1 << 0;
        const STOP_PROPAGATION = 1 << 1;
        const STOP_IMMEDIATE = 1 << 2;
    }
}

/// An event delivered by the host tree.
#[derive(Debug, Clone, Default)]
pub struct HostEvent {
    /// Event name, e.g. `click`, `change`, `keydown`.
    pub name: String,
    /// Key code for keyboard events.
    pub key_code: Option<u16>,
    /// The node the event originated on.
    pub target: Option<NodeKey>,
    /// Payload value (e.g. the edited text of an input-like node).
    pub value: Value,
    /// Directives the binding layer applied while dispatching.
    pub applied: Cell<EventDirectives>,
}

impl HostEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_key_code(mut self, code: u16) -> Self {
        self.key_code = Some(code);
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_target(mut self, node: NodeKey) -> Self {
        self.target = Some(node);
        self
    }
}

// =============================================================================
// Adapter Trait
// =============================================================================

/// The host-tree adapter the engine mounts into.
///
/// Implementations own node identity: the engine only holds opaque
/// [`NodeKey`]s and never assumes anything about their layout.
pub trait HostTree {
    /// Create a detached element node.
    fn create_element(&mut self, tag: &str) -> NodeKey;

    /// Create a detached text node.
    fn create_text(&mut self, text: &str) -> NodeKey;

    /// Insert `child` under `parent`. `None` appends.
    fn insert_child(&mut self, parent: NodeKey, child: NodeKey, index: Option<usize>) -> Result<()>;

    /// Remove `child` from `parent`. Fails if `child` is not under `parent`.
    fn remove_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<()>;

    fn set_attribute(&mut self, node: NodeKey, name: &str, value: &str);

    fn remove_attribute(&mut self, node: NodeKey, name: &str);

    /// Replace the text content of a text node.
    fn set_text(&mut self, node: NodeKey, text: &str);

    fn parent_of(&self, node: NodeKey) -> Option<NodeKey>;

    /// Resolve a selector (`#id` or a bare tag name) to a node.
    fn query_selector(&mut self, selector: &str) -> Option<NodeKey>;

    /// The document root (global key listeners attach here).
    fn document(&self) -> NodeKey;

    fn title(&self) -> String;

    fn set_title(&mut self, title: &str);

    fn add_event_listener(&mut self, node: NodeKey, event: &str, listener: ListenerId);

    fn remove_event_listener(&mut self, node: NodeKey, event: &str, listener: ListenerId);

    /// Downcast access for host-specific inspection (used by tests).
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// =============================================================================
// Installed Host
// =============================================================================

thread_local! {
    static HOST: RefCell<Option<Box<dyn HostTree>>> = const { RefCell::new(None) };
}

/// Install the host tree the engine should mount into.
///
/// Replaces any previously installed host.
pub fn install(host: Box<dyn HostTree>) {
    HOST.with(|cell| {
        *cell.borrow_mut() = Some(host);
    });
}

/// Run `f` against the installed host, installing a fresh [`MemoryHost`]
/// first if none is present.
pub fn with<R>(f: impl FnOnce(&mut dyn HostTree) -> R) -> R {
    HOST.with(|cell| {
        let mut slot = cell.borrow_mut();
        let host = slot.get_or_insert_with(|| Box::new(MemoryHost::new()));
        f(host.as_mut())
    })
}

/// Run `f` against the installed host downcast to [`MemoryHost`].
///
/// Panics if a different host implementation is installed; only tests and
/// example drivers should call this.
pub fn with_memory<R>(f: impl FnOnce(&mut MemoryHost) -> R) -> R {
    with(|host| {
        let memory = host
            .as_any_mut()
            .downcast_mut::<MemoryHost>()
            .expect("installed host is not a MemoryHost");
        f(memory)
    })
}

/// Drop the installed host (for testing).
pub fn reset_host() {
    HOST.with(|cell| {
        *cell.borrow_mut() = None;
    });
}
