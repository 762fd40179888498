//! Lifecycle Controller.
//!
//! Three author-visible phases (`mount`, `render`, `unmount`) plus `init`.
//! Author hooks compose across inheritance as a chain, most-derived first;
//! a hook reaches its ancestor's body through [`Lifecycle::call_super`].
//! A per-(instance, phase) re-entrancy guard makes the engine bookkeeping
//! run exactly once per external invocation: an author hook that calls the
//! public phase function on its own instance falls straight through.
//!
//! Mount order: host insertion, child entries in declaration order, model
//! and declared listeners, author hooks, then the `mounted` flags. Unmount
//! runs the reverse, and host inconsistencies found on the way out are
//! logged and force-detached rather than raised.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::attrs::SlotFlags;
use crate::children;
use crate::compose;
use crate::error::{EngineError, Result};
use crate::events::{self, EventSpec};
use crate::host;
use crate::render::{self, RenderUnit};
use crate::types::{InstanceId, NodeKey, Value};

use super::registry::{self, ChildEntry};

// =============================================================================
// Phases and the re-entrancy guard
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Mount,
    Render,
    Unmount,
}

thread_local! {
    static GUARD: RefCell<HashSet<(InstanceId, Phase)>> = RefCell::new(HashSet::new());
}

/// Returns `true` for the outermost entry into (instance, phase).
fn guard_enter(instance: InstanceId, phase: Phase) -> bool {
    GUARD.with(|g| g.borrow_mut().insert((instance, phase)))
}

fn guard_exit(instance: InstanceId, phase: Phase) {
    GUARD.with(|g| {
        g.borrow_mut().remove(&(instance, phase));
    });
}

/// Clear the guard table (for testing).
pub fn reset_lifecycle_state() {
    GUARD.with(|g| g.borrow_mut().clear());
}

// =============================================================================
// Hook chains
// =============================================================================

/// An author lifecycle hook.
pub type HookFn = Rc<dyn Fn(&mut Lifecycle)>;

/// Context handed to author hooks. `call_super` advances to the next hook
/// in the inheritance chain; each chained body runs at most once per
/// external invocation no matter how often `call_super` is called.
pub struct Lifecycle {
    pub instance: InstanceId,
    chain: Vec<HookFn>,
    next: usize,
}

impl Lifecycle {
    /// Invoke the ancestor's hook body, if any remains in the chain.
    pub fn call_super(&mut self) {
        if self.next >= self.chain.len() {
            return;
        }
        let hook = Rc::clone(&self.chain[self.next]);
        self.next += 1;
        hook(self);
    }

    /// Read an attribute of the instance.
    pub fn get(&self, name: &str) -> Value {
        registry::get_attr(self.instance, name)
    }

    /// Write an attribute of the instance.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        registry::set_attr(self.instance, name, value)
    }
}

fn run_hooks(instance: InstanceId, chain: &[HookFn]) {
    let Some(first) = chain.first() else { return };
    let mut ctx = Lifecycle {
        instance,
        chain: chain.to_vec(),
        next: 1,
    };
    let first = Rc::clone(first);
    first(&mut ctx);
}

pub(crate) fn run_init(instance: InstanceId, chain: &[HookFn]) {
    if !guard_enter(instance, Phase::Init) {
        return;
    }
    run_hooks(instance, chain);
    guard_exit(instance, Phase::Init);
}

// =============================================================================
// Mount
// =============================================================================

/// Attach `instance` under `host_parent` at `index` (append when `None`).
///
/// Mounting an unmounted instance is not supported; clone it instead.
pub fn mount(instance: InstanceId, host_parent: NodeKey, index: Option<usize>) -> Result<()> {
    if registry::is_unmounted(instance) {
        return Err(EngineError::HostTreeState(format!(
            "instance {instance} was unmounted and cannot be re-mounted; create a clone"
        )));
    }
    if !guard_enter(instance, Phase::Mount) {
        // Re-entrant call from an author hook; bookkeeping already ran.
        return Ok(());
    }
    let result = mount_inner(instance, host_parent, index);
    guard_exit(instance, Phase::Mount);
    result
}

fn mount_inner(instance: InstanceId, host_parent: NodeKey, index: Option<usize>) -> Result<()> {
    let node = registry::node_of(instance).ok_or_else(|| {
        EngineError::HostTreeState(format!("mount of unknown instance {instance}"))
    })?;
    let class = compose::class(
        registry::class_of(instance)
            .ok_or_else(|| EngineError::HostTreeState(format!("mount of unknown instance {instance}")))?,
    );

    registry::with_instance_mut(instance, |inst| {
        inst.host_parent = Some(host_parent);
        inst.mounted = true;
    });

    host::with(|h| h.insert_child(host_parent, node, index))?;

    // Child entries in declaration order, each at its computed host index.
    let entries = registry::entries_of(instance);
    let mut host_index = 0usize;
    for (position, entry) in entries.iter().enumerate() {
        match entry {
            ChildEntry::Text { text, .. } => {
                let text_node = host::with(|h| h.create_text(text));
                host::with(|h| h.insert_child(node, text_node, Some(host_index)))?;
                registry::set_entry_node(instance, position, text_node);
                host_index += 1;
            }
            ChildEntry::Content { .. } => {
                let text_node = host::with(|h| h.create_text(""));
                host::with(|h| h.insert_child(node, text_node, Some(host_index)))?;
                registry::set_entry_node(instance, position, text_node);
                host_index += 1;
            }
            ChildEntry::Component(child) => {
                mount(*child, node, Some(host_index))?;
                host_index += 1;
            }
            ChildEntry::Collection(collection) => {
                children::mount_collection(*collection, node, host_index)?;
                host_index += children::item_count(*collection);
            }
        }
    }

    // Modelled slots listen on their event channel for host-side edits.
    for (_, slot) in class.attrs.iter() {
        let Some(channel) = slot.model_channel() else { continue };
        let channel_slot = Rc::clone(slot);
        let listener = events::attach(
            instance,
            node,
            EventSpec {
                name: channel.to_string(),
                key_codes: Default::default(),
                directives: Default::default(),
            },
            Rc::new(move |owner, event| channel_slot.set(owner, event.value.clone())),
        );
        registry::push_listener(instance, listener);
    }

    // Declared listeners become live bindings.
    for decl in &class.listeners {
        let listener = events::attach(instance, node, decl.spec.clone(), Rc::clone(&decl.f));
        registry::push_listener(instance, listener);
    }

    run_hooks(instance, &class.mount_hooks);

    registry::with_instance_mut(instance, |inst| {
        inst.mount_finished = true;
    });

    Ok(())
}

// =============================================================================
// Render
// =============================================================================

/// Repaint `instance` and its subtree.
///
/// A no-op before mount finishes, after unmount, when the node is detached
/// from the host tree (a timer firing after teardown), or when the open
/// cascade already repainted this instance.
pub fn render_component(instance: InstanceId) {
    let ready = registry::with_instance(instance, |inst| inst.mount_finished && !inst.unmounted)
        .unwrap_or(false);
    if !ready {
        return;
    }
    let Some(node) = registry::node_of(instance) else { return };
    if host::with(|h| h.parent_of(node)).is_none() {
        return;
    }
    if !render::cascade_mark(instance) {
        return;
    }
    if !guard_enter(instance, Phase::Render) {
        return;
    }

    render::push(RenderUnit::Component(instance));

    let class = compose::class(registry::class_of(instance).unwrap_or_default());

    // View attributes first, so author hooks observe the written state.
    for (_, slot) in class.attrs.iter() {
        if !slot.flags().contains(SlotFlags::VIEW) {
            continue;
        }
        let name = slot.name();
        match slot.get(instance).view_value() {
            Some(text) => host::with(|h| h.set_attribute(node, &name, &text)),
            None => host::with(|h| h.remove_attribute(node, &name)),
        }
    }

    run_hooks(instance, &class.render_hooks);

    for entry in registry::entries_of(instance) {
        match entry {
            ChildEntry::Component(child) => render_component(child),
            ChildEntry::Collection(collection) => children::render_collection(collection),
            ChildEntry::Content { node: Some(text_node) } => {
                render_content(instance, &class, text_node);
            }
            ChildEntry::Content { node: None } | ChildEntry::Text { .. } => {}
        }
    }

    render::pop();
    guard_exit(instance, Phase::Render);
}

fn render_content(owner: InstanceId, class: &compose::ComposedClass, text_node: NodeKey) {
    let Some(content) = &class.content else {
        return;
    };
    render::push(RenderUnit::Content(owner));
    let value = content(owner);
    render::pop();
    host::with(|h| h.set_text(text_node, &value.to_string()));
}

// =============================================================================
// Unmount
// =============================================================================

/// Tear `instance` down: author hooks, listener detach, children in
/// reverse order, host removal, then cache cleanup. Host-tree
/// inconsistencies on the way out are logged and force-detached.
pub fn unmount(instance: InstanceId) {
    if registry::is_unmounted(instance) {
        return;
    }
    if !guard_enter(instance, Phase::Unmount) {
        return;
    }
    unmount_inner(instance);
    guard_exit(instance, Phase::Unmount);
}

fn unmount_inner(instance: InstanceId) {
    let Some(class_id) = registry::class_of(instance) else { return };
    let class = compose::class(class_id);

    run_hooks(instance, &class.unmount_hooks);

    for listener in registry::take_listeners(instance) {
        events::detach(listener);
    }

    let entries = registry::entries_of(instance);
    for entry in entries.iter().rev() {
        match entry {
            ChildEntry::Component(child) => unmount(*child),
            ChildEntry::Collection(collection) => children::unmount_collection(*collection),
            ChildEntry::Content { .. } | ChildEntry::Text { .. } => {}
        }
    }

    let node = registry::node_of(instance);
    let host_parent = registry::with_instance(instance, |inst| inst.host_parent).flatten();
    if let (Some(node), Some(parent)) = (node, host_parent) {
        if let Err(err) = host::with(|h| h.remove_child(parent, node)) {
            tracing::error!(instance, %err, "inconsistent host tree at unmount; force-detaching");
        }
    }

    for link in registry::take_model_links(instance) {
        link.slot.remove_handler(&link.event, &link.handler);
    }

    registry::with_instance(instance, |inst| {
        for slot in inst.attrs.values() {
            slot.delete(instance);
        }
    });

    registry::with_instance_mut(instance, |inst| {
        inst.mounted = false;
        inst.mount_finished = false;
        inst.unmounted = true;
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::state;
    use crate::compose::{ChildDecl, ClassBuilder};
    use crate::component::{create, get_attr, set_attr};

    fn setup() {
        crate::compose::reset_compose_state();
        crate::host::reset_host();
        crate::events::reset_events_state();
        crate::render::reset_render_state();
        registry::reset_registry_state();
        reset_lifecycle_state();
    }

    fn mount_at_root(instance: InstanceId) {
        let root = host::with(|h| h.document());
        mount(instance, root, None).unwrap();
    }

    #[test]
    fn test_hook_chain_runs_each_body_once() {
        setup();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let base_log = log.clone();
        let base = ClassBuilder::new("Base")
            .mount_hook(Rc::new(move |_| base_log.borrow_mut().push("base")))
            .register()
            .unwrap();

        let derived_log = log.clone();
        let derived = ClassBuilder::new("Derived")
            .extends(base)
            .mount_hook(Rc::new(move |ctx| {
                derived_log.borrow_mut().push("derived-pre");
                ctx.call_super();
                ctx.call_super(); // second super-call reaches nothing
                derived_log.borrow_mut().push("derived-post");
            }))
            .register()
            .unwrap();

        let inst = create(derived, vec![]).unwrap();
        mount_at_root(inst);

        assert_eq!(*log.borrow(), vec!["derived-pre", "base", "derived-post"]);
    }

    #[test]
    fn test_diamond_runs_shared_ancestor_once() {
        setup();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let base_log = log.clone();
        let base = ClassBuilder::new("Base")
            .mount_hook(Rc::new(move |ctx| {
                base_log.borrow_mut().push("base");
                ctx.call_super();
            }))
            .register()
            .unwrap();

        let left_log = log.clone();
        let left = ClassBuilder::new("Left")
            .extends(base)
            .mount_hook(Rc::new(move |ctx| {
                left_log.borrow_mut().push("left");
                ctx.call_super();
            }))
            .register()
            .unwrap();

        let right_log = log.clone();
        let right = ClassBuilder::new("Right")
            .extends(base)
            .mount_hook(Rc::new(move |ctx| {
                right_log.borrow_mut().push("right");
                ctx.call_super();
            }))
            .register()
            .unwrap();

        let bottom = ClassBuilder::new("Bottom")
            .extends(left)
            .extends(right)
            .register()
            .unwrap();

        let inst = create(bottom, vec![]).unwrap();
        mount_at_root(inst);

        // Both paths reach Base, but its body runs once, after both sides.
        assert_eq!(*log.borrow(), vec!["left", "right", "base"]);
    }

    #[test]
    fn test_remount_after_unmount_is_rejected() {
        setup();
        let class = ClassBuilder::new("Once").register().unwrap();
        let inst = create(class, vec![]).unwrap();
        mount_at_root(inst);

        unmount(inst);
        let root = host::with(|h| h.document());
        assert!(matches!(
            mount(inst, root, None),
            Err(EngineError::HostTreeState(_))
        ));
    }

    #[test]
    fn test_render_noop_before_mount_and_after_unmount() {
        setup();
        let renders = Rc::new(RefCell::new(0));
        let renders_clone = renders.clone();
        let class = ClassBuilder::new("Painted")
            .render_hook(Rc::new(move |_| *renders_clone.borrow_mut() += 1))
            .register()
            .unwrap();

        let inst = create(class, vec![]).unwrap();
        render_component(inst);
        assert_eq!(*renders.borrow(), 0);

        mount_at_root(inst);
        render_component(inst);
        assert_eq!(*renders.borrow(), 1);

        unmount(inst);
        render_component(inst);
        assert_eq!(*renders.borrow(), 1);
    }

    #[test]
    fn test_mount_builds_declared_children() {
        setup();
        let leaf = ClassBuilder::new("Leaf")
            .children(vec![ChildDecl::Text("leaf".into())])
            .register()
            .unwrap();
        let parent = ClassBuilder::new("Branch")
            .children(vec![
                ChildDecl::Text("head".into()),
                ChildDecl::Class(leaf, vec![]),
            ])
            .register()
            .unwrap();

        let inst = create(parent, vec![]).unwrap();
        mount_at_root(inst);

        let text = host::with_memory(|h| h.to_text(registry::node_of(inst).unwrap()));
        assert_eq!(text, "headleaf");
    }

    #[test]
    fn test_unmount_clears_slot_cache() {
        setup();
        let class = ClassBuilder::new("Cached")
            .attr("count", state(0))
            .register()
            .unwrap();
        let inst = create(class, vec![]).unwrap();
        mount_at_root(inst);
        set_attr(inst, "count", 8).unwrap();
        assert_eq!(get_attr(inst, "count"), Value::Int(8));

        unmount(inst);
        assert_eq!(get_attr(inst, "count"), Value::Int(0));
    }
}
