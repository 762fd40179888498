//! Instance arena and construction.
//!
//! All live instances sit in a thread-local arena indexed by
//! [`InstanceId`]. Parents own their children through child entries; a
//! child holds only a lookup-only `parent` index back, never an owning
//! reference, so teardown order is always parent-driven.
//!
//! Construction copies the composed class's slot table into the instance,
//! applies construction values in slot-priority order (move-on links
//! resolve before plain values, model wiring last), instantiates declared
//! children recursively, and runs the `init` hook chain. The host subtree
//! is created here but stays detached until `lifecycle::mount`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::attrs::{AttributeSlot, SlotFlags, WriteOrigin};
use crate::children;
use crate::compose;
use crate::error::{EngineError, Result};
use crate::host;
use crate::types::{ClassId, CollectionId, InstanceId, ListenerId, NodeKey, Value};

use super::AttrInit;
use super::lifecycle;

// =============================================================================
// Instance
// =============================================================================

/// One materialized child position of an instance.
#[derive(Clone)]
pub(crate) enum ChildEntry {
    /// A nested component instance.
    Component(InstanceId),
    /// A named children collection.
    Collection(CollectionId),
    /// The content unit; `node` is the host text node once mounted.
    Content { node: Option<NodeKey> },
    /// A literal text child.
    Text { text: String, node: Option<NodeKey> },
}

/// A slot handler installed for a model link, kept so unmount can remove it.
pub(crate) struct ModelLink {
    pub slot: Rc<AttributeSlot>,
    pub event: String,
    pub handler: String,
}

pub(crate) struct Instance {
    pub class: ClassId,
    pub parent: Option<InstanceId>,
    pub node: NodeKey,
    pub host_parent: Option<NodeKey>,
    pub attrs: IndexMap<String, Rc<AttributeSlot>>,
    pub entries: Vec<ChildEntry>,
    pub collections: IndexMap<String, CollectionId>,
    pub dependents: SmallVec<[InstanceId; 4]>,
    pub bound_listeners: Vec<ListenerId>,
    pub model_links: Vec<ModelLink>,
    pub mounted: bool,
    pub mount_finished: bool,
    pub unmounted: bool,
}

thread_local! {
    static ARENA: RefCell<Vec<Option<Instance>>> = const { RefCell::new(Vec::new()) };
}

fn alloc(instance: Instance) -> InstanceId {
    ARENA.with(|a| {
        let mut arena = a.borrow_mut();
        arena.push(Some(instance));
        arena.len() - 1
    })
}

pub(crate) fn with_instance<R>(id: InstanceId, f: impl FnOnce(&Instance) -> R) -> Option<R> {
    ARENA.with(|a| a.borrow().get(id).and_then(|slot| slot.as_ref().map(f)))
}

pub(crate) fn with_instance_mut<R>(id: InstanceId, f: impl FnOnce(&mut Instance) -> R) -> Option<R> {
    ARENA.with(|a| a.borrow_mut().get_mut(id).and_then(|slot| slot.as_mut().map(f)))
}

/// Drop every instance (for testing).
pub fn reset_registry_state() {
    ARENA.with(|a| a.borrow_mut().clear());
}

// =============================================================================
// Accessors
// =============================================================================

pub fn node_of(id: InstanceId) -> Option<NodeKey> {
    with_instance(id, |inst| inst.node)
}

pub fn class_of(id: InstanceId) -> Option<ClassId> {
    with_instance(id, |inst| inst.class)
}

pub fn parent_of(id: InstanceId) -> Option<InstanceId> {
    with_instance(id, |inst| inst.parent).flatten()
}

pub fn is_mounted(id: InstanceId) -> bool {
    with_instance(id, |inst| inst.mounted && !inst.unmounted).unwrap_or(false)
}

pub(crate) fn is_unmounted(id: InstanceId) -> bool {
    with_instance(id, |inst| inst.unmounted).unwrap_or(false)
}

/// Direct component children, in declaration order.
pub fn child_components(id: InstanceId) -> Vec<InstanceId> {
    with_instance(id, |inst| {
        inst.entries
            .iter()
            .filter_map(|entry| match entry {
                ChildEntry::Component(child) => Some(*child),
                _ => None,
            })
            .collect()
    })
    .unwrap_or_default()
}

/// The named children collection declared with `ChildDecl::Slot`.
pub fn collection_of(id: InstanceId, name: &str) -> Option<CollectionId> {
    with_instance(id, |inst| inst.collections.get(name).copied()).flatten()
}

pub(crate) fn slot_of(id: InstanceId, name: &str) -> Option<Rc<AttributeSlot>> {
    with_instance(id, |inst| inst.attrs.get(name).map(Rc::clone)).flatten()
}

/// Read an attribute value; `Null` for unknown slot names.
pub fn get_attr(id: InstanceId, name: &str) -> Value {
    slot_of(id, name).map(|slot| slot.get(id)).unwrap_or(Value::Null)
}

/// Write an attribute value through its slot.
pub fn set_attr(id: InstanceId, name: &str, value: impl Into<Value>) -> Result<()> {
    match slot_of(id, name) {
        Some(slot) => slot.set(id, value.into()),
        None => Err(EngineError::MissingAttribute(name.to_string())),
    }
}

pub(crate) fn entries_of(id: InstanceId) -> Vec<ChildEntry> {
    with_instance(id, |inst| inst.entries.clone()).unwrap_or_default()
}

pub(crate) fn set_entry_node(id: InstanceId, entry: usize, node: NodeKey) {
    with_instance_mut(id, |inst| {
        match inst.entries.get_mut(entry) {
            Some(ChildEntry::Content { node: slot }) | Some(ChildEntry::Text { node: slot, .. }) => {
                *slot = Some(node);
            }
            _ => {}
        }
    });
}

/// Host-tree index where the child entry `entry_index` of `owner` begins.
/// Collections occupy as many host positions as they have items.
pub(crate) fn host_base_index(owner: InstanceId, entry_index: usize) -> usize {
    entries_of(owner)
        .iter()
        .take(entry_index)
        .map(|entry| match entry {
            ChildEntry::Collection(collection) => children::item_count(*collection),
            _ => 1,
        })
        .sum()
}

pub(crate) fn dependents_of(id: InstanceId) -> Vec<InstanceId> {
    with_instance(id, |inst| inst.dependents.to_vec()).unwrap_or_default()
}

/// Record `dependent` as needing a repaint when `owner` changes.
/// First-recorded order is preserved; duplicates are ignored.
pub(crate) fn add_dependent(owner: InstanceId, dependent: InstanceId) {
    if owner == dependent {
        return;
    }
    with_instance_mut(owner, |inst| {
        if !inst.dependents.contains(&dependent) {
            inst.dependents.push(dependent);
        }
    });
}

pub(crate) fn push_listener(id: InstanceId, listener: ListenerId) {
    with_instance_mut(id, |inst| inst.bound_listeners.push(listener));
}

pub(crate) fn take_listeners(id: InstanceId) -> Vec<ListenerId> {
    with_instance_mut(id, |inst| std::mem::take(&mut inst.bound_listeners)).unwrap_or_default()
}

pub(crate) fn take_model_links(id: InstanceId) -> Vec<ModelLink> {
    with_instance_mut(id, |inst| std::mem::take(&mut inst.model_links)).unwrap_or_default()
}

// =============================================================================
// Construction
// =============================================================================

/// Construct an instance of `class_id` with the given attribute values.
///
/// Fails before any host mutation if a `required` slot is left without a
/// value. The instance's host subtree is created detached; call
/// `lifecycle::mount` (or `pipeline::mount` for a root) to attach it.
pub fn create(class_id: ClassId, kwargs: Vec<(String, AttrInit)>) -> Result<InstanceId> {
    create_with_parent(class_id, kwargs, None)
}

pub(crate) fn create_with_parent(
    class_id: ClassId,
    kwargs: Vec<(String, AttrInit)>,
    parent: Option<InstanceId>,
) -> Result<InstanceId> {
    let class = compose::class(class_id);

    // Required slots must be satisfied by kwargs or a class default.
    for (name, slot) in &class.attrs {
        if !slot.flags().contains(SlotFlags::REQUIRED) {
            continue;
        }
        let provided = kwargs.iter().any(|(k, init)| {
            k == name && !matches!(init, AttrInit::Value(Value::Null))
        }) || class.attr_defaults.get(name).is_some_and(|v| !v.is_null());
        if !provided {
            return Err(EngineError::MissingAttribute(name.clone()));
        }
    }

    let node = host::with(|h| h.create_element(&class.tag));
    let instance = alloc(Instance {
        class: class_id,
        parent,
        node,
        host_parent: None,
        attrs: class.attrs.clone(),
        entries: Vec::new(),
        collections: IndexMap::new(),
        dependents: SmallVec::new(),
        bound_listeners: Vec::new(),
        model_links: Vec::new(),
        mounted: false,
        mount_finished: false,
        unmounted: false,
    });

    // Apply construction values in slot-priority order (the class table is
    // already sorted: move-on, plain, modelled).
    for (name, slot) in class.attrs.iter() {
        let init = kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
        match init {
            Some(AttrInit::Value(value)) => {
                if !value.is_null() {
                    slot.set(instance, value)?;
                }
            }
            Some(AttrInit::Bind { source, attr }) => {
                link_model(instance, name, slot, source, &attr)?;
            }
            Some(AttrInit::BindParent(attr)) => {
                let source = parent.ok_or_else(|| {
                    EngineError::HostTreeState(format!(
                        "attribute `{name}` binds to a parent, but the instance has none"
                    ))
                })?;
                link_model(instance, name, slot, source, &attr)?;
            }
            None => {
                if slot.flags().contains(SlotFlags::MOVE_ON) {
                    if let Some(p) = parent {
                        if let Some(parent_slot) = slot_of(p, name) {
                            let value = parent_slot.get(p);
                            if !value.is_null() {
                                slot.set(instance, value)?;
                                continue;
                            }
                        }
                    }
                }
                if let Some(default) = class.attr_defaults.get(name) {
                    slot.set(instance, default.clone())?;
                }
            }
        }
    }

    // Materialize declared children. Each declared `ChildRef` produces a
    // fresh instance here, never a shared one.
    let mut entries: Vec<ChildEntry> = Vec::new();
    let mut collections: IndexMap<String, CollectionId> = IndexMap::new();
    for spec in &class.children {
        match spec {
            compose::ChildSpec::Content => entries.push(ChildEntry::Content { node: None }),
            compose::ChildSpec::Text(text) => entries.push(ChildEntry::Text {
                text: text.clone(),
                node: None,
            }),
            compose::ChildSpec::Ref(ref_id) => {
                let (child_class, child_kwargs) = compose::child_ref(*ref_id);
                let child = create_with_parent(child_class, child_kwargs, Some(instance))?;
                entries.push(ChildEntry::Component(child));
            }
            compose::ChildSpec::Slot(name) => {
                let collection = children::alloc_collection(instance, entries.len());
                collections.insert(name.clone(), collection);
                entries.push(ChildEntry::Collection(collection));
            }
        }
    }
    with_instance_mut(instance, |inst| {
        inst.entries = entries;
        inst.collections = collections;
    });

    lifecycle::run_init(instance, &class.init_hooks);

    Ok(instance)
}

/// Construct a fresh instance of the same class carrying the current
/// attribute values of `id`. Model links and dependents are not carried
/// over; the clone starts with a clean reactive surface.
pub fn clone_instance(id: InstanceId) -> Result<InstanceId> {
    let class_id = class_of(id).ok_or_else(|| {
        EngineError::HostTreeState(format!("clone of unknown instance {id}"))
    })?;
    let slots: Vec<(String, Rc<AttributeSlot>)> = with_instance(id, |inst| {
        inst.attrs
            .iter()
            .map(|(name, slot)| (name.clone(), Rc::clone(slot)))
            .collect()
    })
    .unwrap_or_default();
    let kwargs: Vec<(String, AttrInit)> = slots
        .into_iter()
        .map(|(name, slot)| {
            let value = slot.get(id);
            (name, AttrInit::Value(value))
        })
        .collect();
    create(class_id, kwargs)
}

// =============================================================================
// Model linking
// =============================================================================

/// Wire a two-way model link: `slot` on `instance` follows `source_attr`
/// on `source`, and edits flow back.
///
/// The source's current value (or the declared type's zero value) is
/// copied in immediately. Both propagation handlers are echo-tagged and
/// filtered by writer identity, so a propagated write never bounces back.
fn link_model(
    instance: InstanceId,
    name: &str,
    slot: &Rc<AttributeSlot>,
    source: InstanceId,
    source_attr: &str,
) -> Result<()> {
    let source_slot = slot_of(source, source_attr).ok_or_else(|| {
        EngineError::HostTreeState(format!(
            "model link for `{name}` targets unknown attribute `{source_attr}` on instance {source}"
        ))
    })?;

    let initial = {
        let value = source_slot.get(source);
        if value.is_null() {
            slot.declared_type().zero_value()
        } else {
            value
        }
    };
    slot.set_with_origin(instance, initial, WriteOrigin::Model)?;

    let down_name = format!("model:{instance}:{name}:down");
    let up_name = format!("model:{instance}:{name}:up");

    let down_slot = Rc::clone(slot);
    source_slot.on_tagged(
        "change",
        &down_name,
        true,
        Rc::new(move |writer, value| {
            if writer != source {
                return;
            }
            if let Err(err) = down_slot.set_with_origin(instance, value.clone(), WriteOrigin::Model)
            {
                tracing::warn!(%err, "model link could not propagate downward");
            }
        }),
    )?;

    let up_slot = Rc::clone(&source_slot);
    slot.on_tagged(
        "change",
        &up_name,
        true,
        Rc::new(move |writer, value| {
            if writer != instance {
                return;
            }
            if let Err(err) = up_slot.set_with_origin(source, value.clone(), WriteOrigin::Model) {
                tracing::warn!(%err, "model link could not propagate upward");
            }
        }),
    )?;

    with_instance_mut(instance, |inst| {
        inst.model_links.push(ModelLink {
            slot: Rc::clone(&source_slot),
            event: "change".to_string(),
            handler: down_name,
        });
        inst.model_links.push(ModelLink {
            slot: Rc::clone(slot),
            event: "change".to_string(),
            handler: up_name,
        });
    });

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{attr, state};
    use crate::compose::ClassBuilder;

    fn setup() {
        crate::compose::reset_compose_state();
        crate::host::reset_host();
        crate::render::reset_render_state();
        reset_registry_state();
    }

    #[test]
    fn test_create_applies_kwargs_and_defaults() {
        setup();
        let class = ClassBuilder::new("Widget")
            .attr("label", attr("fallback"))
            .attr("count", state(0))
            .register()
            .unwrap();

        let a = create(class, vec![("count".into(), 5.into())]).unwrap();
        assert_eq!(get_attr(a, "count"), Value::Int(5));
        assert_eq!(get_attr(a, "label"), Value::from("fallback"));

        // Sibling instances never share non-static values.
        let b = create(class, vec![]).unwrap();
        assert_eq!(get_attr(b, "count"), Value::Int(0));
    }

    #[test]
    fn test_required_unset_fails_before_mount() {
        setup();
        let class = ClassBuilder::new("Strict")
            .attr("target", attr(Value::Null).required())
            .register()
            .unwrap();

        let err = create(class, vec![]).unwrap_err();
        assert!(matches!(err, EngineError::MissingAttribute(name) if name == "target"));

        assert!(create(class, vec![("target".into(), "x".into())]).is_ok());
    }

    #[test]
    fn test_attr_default_satisfies_required() {
        setup();
        let base = ClassBuilder::new("Strict")
            .attr("target", attr(Value::Null).required())
            .register()
            .unwrap();
        let derived = ClassBuilder::new("Relaxed")
            .extends(base)
            .attr_default("target", "preset")
            .register()
            .unwrap();

        let inst = create(derived, vec![]).unwrap();
        assert_eq!(get_attr(inst, "target"), Value::from("preset"));
    }

    #[test]
    fn test_model_round_trip_without_echo() {
        setup();
        let source_class = ClassBuilder::new("Form")
            .attr("value", state(""))
            .register()
            .unwrap();
        let input_class = ClassBuilder::new("TextInput")
            .attr("value", state("").model("change"))
            .register()
            .unwrap();

        let form = create(source_class, vec![]).unwrap();
        let input = create(
            input_class,
            vec![(
                "value".into(),
                AttrInit::Bind {
                    source: form,
                    attr: "value".into(),
                },
            )],
        )
        .unwrap();

        set_attr(form, "value", "down").unwrap();
        assert_eq!(get_attr(input, "value"), Value::from("down"));

        set_attr(input, "value", "up").unwrap();
        assert_eq!(get_attr(form, "value"), Value::from("up"));
    }

    #[test]
    fn test_write_during_render_is_not_a_read() {
        setup();
        let class = ClassBuilder::new("Widget")
            .attr("count", state(0))
            .register()
            .unwrap();
        let a = create(class, vec![]).unwrap();
        let b = create(class, vec![]).unwrap();

        // Simulate b being mid-render while a is written to.
        crate::render::push(crate::render::RenderUnit::Component(b));
        set_attr(a, "count", 5).unwrap();
        assert!(dependents_of(a).is_empty());

        // A genuine read during the render still records the renderer.
        let _ = get_attr(a, "count");
        crate::render::pop();
        assert_eq!(dependents_of(a), vec![b]);
    }

    #[test]
    fn test_clone_carries_values() {
        setup();
        let class = ClassBuilder::new("Widget")
            .attr("count", state(0))
            .register()
            .unwrap();
        let original = create(class, vec![]).unwrap();
        set_attr(original, "count", 9).unwrap();

        let copy = clone_instance(original).unwrap();
        assert_ne!(copy, original);
        assert_eq!(get_attr(copy, "count"), Value::Int(9));

        // The copy's value is independent afterwards.
        set_attr(copy, "count", 1).unwrap();
        assert_eq!(get_attr(original, "count"), Value::Int(9));
    }
}
