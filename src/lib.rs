//! # wisp-ui
//!
//! Fine-grained reactive component engine for host-tree UIs.
//!
//! Components are declared as composed classes: attribute slots, a children
//! list, lifecycle hooks, and event listeners, merged across inheritance at
//! build time. Instances mount into an abstract host tree (a DOM-like
//! structure behind the [`host::HostTree`] adapter) and repaint through a
//! render dependency tracker instead of a diff pass: an attribute write
//! repaints exactly the owning component and the renderers recorded as its
//! dependents.
//!
//! ## Data Flow
//!
//! ```text
//! ClassBuilder → composed class tables → create() copies tables per instance
//!     → mount() attaches attributes/children/listeners to the host tree
//!     → slot writes fire change handlers → dependency tracker re-renders
//!     → children collections apply incremental host mutations
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Core types ([`Value`], [`DeclaredType`], identifier aliases)
//! - [`attrs`] - Reactive attribute slots ([`attr`]/[`state`] constructors)
//! - [`compose`] - Build-time class composition ([`ClassBuilder`])
//! - [`component`] - Instance arena and the mount/render/unmount lifecycle
//! - [`children`] - Ordered, change-tracked child collections
//! - [`render`] - Render stack, dependents, and notification cascades
//! - [`events`] - `name.modifier` listener specs and bubbling dispatch
//! - [`host`] - Host-tree adapter trait and the in-memory reference host
//! - [`runtime`] - Microtask queue and tick-driven intervals
//! - [`pipeline`] - Root mounting ([`mount`])

pub mod attrs;
pub mod children;
pub mod component;
pub mod compose;
pub mod error;
pub mod events;
pub mod host;
pub mod pipeline;
pub mod render;
pub mod runtime;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use attrs::{AttributeSlot, SlotBuilder, SlotFlags, attr, state};

pub use compose::{ChildDecl, ClassBuilder, ComposedClass, ContentFn, reset_compose_state};

pub use component::{
    AttrInit, Lifecycle, Phase, child_components, clone_instance, collection_of, create, get_attr,
    is_mounted, node_of, render_component, set_attr, unmount,
};

pub use children::{
    SilenceGuard, assign, clear, insert, item_count, items, on_change, push, remove, remove_item,
    reset_children_state, silence,
};

pub use render::{notify_change, reset_render_state};

pub use events::{EventHandlerFn, EventSpec, GLOBAL_EVENTS, emit, reset_events_state};

pub use host::{EventDirectives, HostEvent, HostOp, HostTree, MemoryHost, install, reset_host};

pub use runtime::{IntervalHandle, advance, drain_microtasks, queue_microtask, reset_runtime, set_interval};

pub use pipeline::{MountHandle, mount};

pub use error::{EngineError, Result};
