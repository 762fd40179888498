//! Class Composition Engine.
//!
//! Component classes are built once, registered in a thread-local table,
//! and referenced by [`ClassId`] afterwards. Composition resolves
//! inheritance at build time, so instance creation never walks a lineage:
//!
//! - **Ancestry linearizes**: direct parents in declaration order, then
//!   their ancestors, each class appearing once. A diamond's shared base
//!   therefore contributes its slots, children, hooks, and listeners a
//!   single time, however many paths reach it.
//! - **Attribute slots** merge base-most first, so a nearer declaration
//!   shadows a farther one. Slots are `Rc`-shared with ancestor classes,
//!   which is safe because values are cached per instance. The merged
//!   table is stably sorted by slot priority (move-on links before plain
//!   slots before modelled slots).
//! - **Children lists** merge through markers: [`ChildDecl::Super`] splices
//!   the inherited list in place, [`ChildDecl::Overwrite`] discards it, and
//!   a marker-free list gets the inherited list prepended implicitly. A
//!   class with no children anywhere renders its own content.
//! - **Lifecycle hooks** chain most-derived first; a hook reaches the
//!   next ancestor's body through `call_super`, and each body sits in the
//!   chain exactly once.
//! - **Event listeners** are parsed eagerly, so a bad `.modifier` fails the
//!   class build instead of the first dispatch.
//!
//! # Example
//!
//! ```ignore
//! let button = ClassBuilder::new("PushButton")
//!     .attr("label", attr("Ok"))
//!     .listener("click.prevent", "activate", Rc::new(|i, _| { ... }))
//!     .register()?;
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::attrs::{AttributeSlot, SlotBuilder};
use crate::component::AttrInit;
use crate::component::lifecycle::HookFn;
use crate::error::{EngineError, Result};
use crate::events::{self, EventHandlerFn, EventSpec};
use crate::types::{ChildRefId, ClassId, InstanceId, Value, to_kebab_case};

// =============================================================================
// Declarations
// =============================================================================

/// One entry in a class's declared children list.
pub enum ChildDecl {
    /// Splice the inherited children list here.
    Super,
    /// Discard the inherited children list.
    Overwrite,
    /// Render the class's content closure here.
    Content,
    /// A literal text node.
    Text(String),
    /// A nested component instance, created with the given attribute values.
    Class(ClassId, Vec<(String, AttrInit)>),
    /// A named collection slot (see `children::new_collection`).
    Slot(String),
}

/// Resolved child entry stored on the composed class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildSpec {
    Content,
    Text(String),
    Ref(ChildRefId),
    Slot(String),
}

/// A class's own child declarations after spec resolution, markers kept so
/// descendants can splice or discard the inherited list.
pub(crate) enum OwnChildEntry {
    Spec(ChildSpec),
    InheritHere,
    Discard,
}

/// Content closure: produces the value rendered into the content text node.
pub type ContentFn = Rc<dyn Fn(InstanceId) -> Value>;

#[derive(Clone)]
pub(crate) struct ListenerDecl {
    pub spec: EventSpec,
    pub handler_name: String,
    pub f: EventHandlerFn,
}

// =============================================================================
// ComposedClass
// =============================================================================

/// A fully resolved component class.
pub struct ComposedClass {
    pub name: String,
    pub tag: String,
    /// Linearized ancestors, nearest first; a shared ancestor appears once.
    pub lineage: Vec<ClassId>,
    /// Slots in priority order (stable within equal priority).
    pub attrs: IndexMap<String, Rc<AttributeSlot>>,
    /// Per-class default overrides applied before construction kwargs.
    pub attr_defaults: IndexMap<String, Value>,
    pub children: Vec<ChildSpec>,
    /// Hook chains, most-derived first, one entry per contributing class.
    pub init_hooks: Vec<HookFn>,
    pub mount_hooks: Vec<HookFn>,
    pub render_hooks: Vec<HookFn>,
    pub unmount_hooks: Vec<HookFn>,
    pub(crate) listeners: Vec<ListenerDecl>,
    pub content: Option<ContentFn>,
    // Own contributions, kept so descendants merge through the lineage
    // instead of re-flattening ancestor tables.
    pub(crate) own_attrs: Vec<(String, Rc<AttributeSlot>)>,
    pub(crate) own_attr_defaults: Vec<(String, Value)>,
    pub(crate) own_children: Option<Vec<OwnChildEntry>>,
    pub(crate) own_init_hook: Option<HookFn>,
    pub(crate) own_mount_hook: Option<HookFn>,
    pub(crate) own_render_hook: Option<HookFn>,
    pub(crate) own_unmount_hook: Option<HookFn>,
    pub(crate) own_listeners: Vec<ListenerDecl>,
    pub(crate) own_content: Option<ContentFn>,
}

thread_local! {
    static CLASSES: RefCell<Vec<Rc<ComposedClass>>> = const { RefCell::new(Vec::new()) };
    static CHILD_REFS: RefCell<Vec<(ClassId, Vec<(String, AttrInit)>)>> =
        const { RefCell::new(Vec::new()) };
}

/// Look up a registered class.
pub fn class(id: ClassId) -> Rc<ComposedClass> {
    CLASSES.with(|c| Rc::clone(&c.borrow()[id]))
}

/// Resolve a declared-child reference to its class and attribute values.
pub(crate) fn child_ref(id: ChildRefId) -> (ClassId, Vec<(String, AttrInit)>) {
    CHILD_REFS.with(|refs| refs.borrow()[id].clone())
}

/// Clear the class and child-ref registries (for testing).
pub fn reset_compose_state() {
    CLASSES.with(|c| c.borrow_mut().clear());
    CHILD_REFS.with(|r| r.borrow_mut().clear());
}

// =============================================================================
// ClassBuilder
// =============================================================================

/// Fluent builder for a component class.
pub struct ClassBuilder {
    name: String,
    tag: Option<String>,
    extends: Vec<ClassId>,
    attrs: Vec<(String, SlotBuilder)>,
    attr_defaults: Vec<(String, Value)>,
    children: Option<Vec<ChildDecl>>,
    init_hook: Option<HookFn>,
    mount_hook: Option<HookFn>,
    render_hook: Option<HookFn>,
    unmount_hook: Option<HookFn>,
    listeners: Vec<(String, String, EventHandlerFn)>,
    content: Option<ContentFn>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tag: None,
            extends: Vec::new(),
            attrs: Vec::new(),
            attr_defaults: Vec::new(),
            children: None,
            init_hook: None,
            mount_hook: None,
            render_hook: None,
            unmount_hook: None,
            listeners: Vec::new(),
            content: None,
        }
    }

    /// Inherit from an already-registered class. May be called repeatedly;
    /// parents merge in call order.
    pub fn extends(mut self, parent: ClassId) -> Self {
        self.extends.push(parent);
        self
    }

    /// Override the host tag (defaults to the kebab-cased class name).
    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    /// Declare an attribute slot.
    pub fn attr(mut self, name: &str, builder: SlotBuilder) -> Self {
        self.attrs.push((name.to_string(), builder));
        self
    }

    /// Override the default value of an inherited slot without redeclaring it.
    pub fn attr_default(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attr_defaults.push((name.to_string(), value.into()));
        self
    }

    /// Declare the children list. Omitting this inherits the parent list,
    /// or falls back to rendering content.
    pub fn children(mut self, decls: Vec<ChildDecl>) -> Self {
        self.children = Some(decls);
        self
    }

    /// Bind an event listener from a `name.modifier` spec string.
    pub fn listener(mut self, spec: &str, handler_name: &str, f: EventHandlerFn) -> Self {
        self.listeners
            .push((spec.to_string(), handler_name.to_string(), f));
        self
    }

    pub fn init_hook(mut self, f: HookFn) -> Self {
        self.init_hook = Some(f);
        self
    }

    pub fn mount_hook(mut self, f: HookFn) -> Self {
        self.mount_hook = Some(f);
        self
    }

    pub fn render_hook(mut self, f: HookFn) -> Self {
        self.render_hook = Some(f);
        self
    }

    pub fn unmount_hook(mut self, f: HookFn) -> Self {
        self.unmount_hook = Some(f);
        self
    }

    /// The content closure rendered wherever the children list says
    /// [`ChildDecl::Content`].
    pub fn content(mut self, f: ContentFn) -> Self {
        self.content = Some(f);
        self
    }

    /// Resolve inheritance and register the class.
    pub fn register(self) -> Result<ClassId> {
        let name = to_kebab_case(&self.name);
        let tag = self.tag.unwrap_or_else(|| name.clone());

        // ---- lineage ----------------------------------------------------
        // Direct parents in declaration order, then their ancestors, each
        // class once. Every merge below walks this list, so a diamond's
        // shared base contributes exactly one set of everything.
        let mut lineage: Vec<ClassId> = Vec::new();
        for &parent in &self.extends {
            if !lineage.contains(&parent) {
                lineage.push(parent);
            }
        }
        for &parent in &self.extends {
            for &ancestor in &class(parent).lineage {
                if !lineage.contains(&ancestor) {
                    lineage.push(ancestor);
                }
            }
        }
        let ancestry: Vec<Rc<ComposedClass>> = lineage.iter().map(|&id| class(id)).collect();

        // ---- attribute slots ----------------------------------------------
        let mut own_attrs: Vec<(String, Rc<AttributeSlot>)> = Vec::new();
        for (raw_name, builder) in self.attrs {
            let slot_name = to_kebab_case(&raw_name);
            let slot = builder.build(&slot_name);
            own_attrs.push((slot_name, slot));
        }
        let own_attr_defaults: Vec<(String, Value)> = self
            .attr_defaults
            .into_iter()
            .map(|(raw_name, value)| (to_kebab_case(&raw_name), value))
            .collect();

        // Base-most first, so a nearer declaration shadows a farther one.
        let mut attrs: IndexMap<String, Rc<AttributeSlot>> = IndexMap::new();
        let mut attr_defaults: IndexMap<String, Value> = IndexMap::new();
        for ancestor in ancestry.iter().rev() {
            for (slot_name, slot) in &ancestor.own_attrs {
                attrs.insert(slot_name.clone(), Rc::clone(slot));
            }
            for (slot_name, value) in &ancestor.own_attr_defaults {
                attr_defaults.insert(slot_name.clone(), value.clone());
            }
        }
        for (slot_name, slot) in &own_attrs {
            attrs.insert(slot_name.clone(), Rc::clone(slot));
        }
        for (slot_name, value) in &own_attr_defaults {
            attr_defaults.insert(slot_name.clone(), value.clone());
        }
        attrs.sort_by(|_, a, _, b| a.priority().cmp(&b.priority()));

        // ---- children -------------------------------------------------------
        let own_children: Option<Vec<OwnChildEntry>> = self.children.map(|decls| {
            decls
                .into_iter()
                .map(|decl| match decl {
                    ChildDecl::Super => OwnChildEntry::InheritHere,
                    ChildDecl::Overwrite => OwnChildEntry::Discard,
                    ChildDecl::Content => OwnChildEntry::Spec(ChildSpec::Content),
                    ChildDecl::Text(text) => OwnChildEntry::Spec(ChildSpec::Text(text)),
                    ChildDecl::Class(class_id, kwargs) => {
                        let ref_id = CHILD_REFS.with(|refs| {
                            let mut refs = refs.borrow_mut();
                            refs.push((class_id, kwargs));
                            refs.len() - 1
                        });
                        OwnChildEntry::Spec(ChildSpec::Ref(ref_id))
                    }
                    ChildDecl::Slot(slot) => OwnChildEntry::Spec(ChildSpec::Slot(slot)),
                })
                .collect()
        });

        // Fold the lineage base-most first: each class applies its own
        // declarations (and markers) to what it inherits.
        let mut inherited: Vec<ChildSpec> = Vec::new();
        for ancestor in ancestry.iter().rev() {
            inherited = apply_children(ancestor.own_children.as_deref(), inherited);
        }
        let children = match &own_children {
            Some(entries) => apply_children(Some(entries.as_slice()), inherited),
            None if !inherited.is_empty() => inherited,
            None => vec![ChildSpec::Content],
        };

        // ---- hooks ----------------------------------------------------------
        let own_init_hook = self.init_hook;
        let own_mount_hook = self.mount_hook;
        let own_render_hook = self.render_hook;
        let own_unmount_hook = self.unmount_hook;
        let chain = |own: &Option<HookFn>, pick: fn(&ComposedClass) -> Option<&HookFn>| {
            let mut hooks: Vec<HookFn> = own.iter().cloned().collect();
            for ancestor in &ancestry {
                if let Some(hook) = pick(ancestor) {
                    hooks.push(Rc::clone(hook));
                }
            }
            hooks
        };
        let init_hooks = chain(&own_init_hook, |c| c.own_init_hook.as_ref());
        let mount_hooks = chain(&own_mount_hook, |c| c.own_mount_hook.as_ref());
        let render_hooks = chain(&own_render_hook, |c| c.own_render_hook.as_ref());
        let unmount_hooks = chain(&own_unmount_hook, |c| c.own_unmount_hook.as_ref());

        // ---- listeners ------------------------------------------------------
        // Ancestor listeners bind base-most first, own listeners last.
        let mut listeners: Vec<ListenerDecl> = Vec::new();
        for ancestor in ancestry.iter().rev() {
            listeners.extend(ancestor.own_listeners.iter().cloned());
        }
        let mut own_listeners: Vec<ListenerDecl> = Vec::new();
        for (spec_str, handler_name, f) in self.listeners {
            let spec = events::parse(&spec_str)?;
            let duplicate = listeners
                .iter()
                .chain(own_listeners.iter())
                .any(|l| l.spec.name == spec.name && l.handler_name == handler_name);
            if duplicate {
                return Err(EngineError::DuplicateHandler {
                    event: spec.name,
                    handler: handler_name,
                });
            }
            own_listeners.push(ListenerDecl {
                spec,
                handler_name,
                f,
            });
        }
        listeners.extend(own_listeners.iter().cloned());

        // ---- content --------------------------------------------------------
        let own_content = self.content;
        let content = own_content
            .clone()
            .or_else(|| ancestry.iter().find_map(|a| a.own_content.clone()));

        let composed = Rc::new(ComposedClass {
            name,
            tag,
            lineage,
            attrs,
            attr_defaults,
            children,
            init_hooks,
            mount_hooks,
            render_hooks,
            unmount_hooks,
            listeners,
            content,
            own_attrs,
            own_attr_defaults,
            own_children,
            own_init_hook,
            own_mount_hook,
            own_render_hook,
            own_unmount_hook,
            own_listeners,
            own_content,
        });

        Ok(CLASSES.with(|c| {
            let mut classes = c.borrow_mut();
            classes.push(composed);
            classes.len() - 1
        }))
    }
}

/// Apply one class's own child declarations to the list it inherits.
fn apply_children(own: Option<&[OwnChildEntry]>, inherited: Vec<ChildSpec>) -> Vec<ChildSpec> {
    let Some(entries) = own else {
        return inherited;
    };
    let has_marker = entries
        .iter()
        .any(|e| !matches!(e, OwnChildEntry::Spec(_)));

    let mut out: Vec<ChildSpec> = Vec::new();
    // A marker-free list keeps the inherited entries in front.
    if !has_marker {
        out.extend(inherited.iter().cloned());
    }
    for entry in entries {
        match entry {
            OwnChildEntry::Spec(spec) => out.push(spec.clone()),
            OwnChildEntry::InheritHere => out.extend(inherited.iter().cloned()),
            OwnChildEntry::Discard => {}
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{attr, state};

    fn setup() {
        reset_compose_state();
    }

    #[test]
    fn test_register_defaults_to_content() {
        setup();
        let id = ClassBuilder::new("Plain").register().unwrap();
        let c = class(id);
        assert_eq!(c.name, "plain");
        assert_eq!(c.tag, "plain");
        assert_eq!(c.children, vec![ChildSpec::Content]);
    }

    #[test]
    fn test_attr_merge_and_shadowing() {
        setup();
        let base = ClassBuilder::new("Base")
            .attr("label", attr("base"))
            .attr("count", state(0))
            .register()
            .unwrap();
        let derived = ClassBuilder::new("Derived")
            .extends(base)
            .attr("label", attr("derived"))
            .register()
            .unwrap();

        let c = class(derived);
        assert_eq!(c.attrs.len(), 2);
        assert_eq!(c.attrs["label"].get(1), Value::from("derived"));
        // Inherited slot object is shared with the parent.
        assert!(Rc::ptr_eq(&c.attrs["count"], &class(base).attrs["count"]));
    }

    #[test]
    fn test_attrs_sorted_by_priority() {
        setup();
        let id = ClassBuilder::new("Ordered")
            .attr("modelled", state("").model("change"))
            .attr("plain", attr(""))
            .attr("linked", state("").move_on())
            .register()
            .unwrap();
        let c = class(id);
        let names: Vec<&str> = c.attrs.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["linked", "plain", "modelled"]);
    }

    #[test]
    fn test_super_splices_inherited_children() {
        setup();
        let base = ClassBuilder::new("Base")
            .children(vec![ChildDecl::Text("base".into())])
            .register()
            .unwrap();
        let derived = ClassBuilder::new("Derived")
            .extends(base)
            .children(vec![
                ChildDecl::Text("before".into()),
                ChildDecl::Super,
                ChildDecl::Text("after".into()),
            ])
            .register()
            .unwrap();

        assert_eq!(
            class(derived).children,
            vec![
                ChildSpec::Text("before".into()),
                ChildSpec::Text("base".into()),
                ChildSpec::Text("after".into()),
            ]
        );
    }

    #[test]
    fn test_markerless_list_prepends_inherited() {
        setup();
        let base = ClassBuilder::new("Base")
            .children(vec![ChildDecl::Text("base".into())])
            .register()
            .unwrap();
        let derived = ClassBuilder::new("Derived")
            .extends(base)
            .children(vec![ChildDecl::Text("own".into())])
            .register()
            .unwrap();

        assert_eq!(
            class(derived).children,
            vec![ChildSpec::Text("base".into()), ChildSpec::Text("own".into())]
        );
    }

    #[test]
    fn test_overwrite_discards_inherited() {
        setup();
        let base = ClassBuilder::new("Base")
            .children(vec![ChildDecl::Text("base".into())])
            .register()
            .unwrap();
        let derived = ClassBuilder::new("Derived")
            .extends(base)
            .children(vec![ChildDecl::Overwrite, ChildDecl::Text("own".into())])
            .register()
            .unwrap();

        assert_eq!(class(derived).children, vec![ChildSpec::Text("own".into())]);
    }

    #[test]
    fn test_diamond_ancestor_contributes_once() {
        setup();
        let base = ClassBuilder::new("Base")
            .children(vec![ChildDecl::Text("base".into())])
            .mount_hook(Rc::new(|_| {}))
            .listener("click", "go", Rc::new(|_, _| Ok(())))
            .register()
            .unwrap();
        let left = ClassBuilder::new("Left")
            .extends(base)
            .mount_hook(Rc::new(|_| {}))
            .register()
            .unwrap();
        let right = ClassBuilder::new("Right")
            .extends(base)
            .mount_hook(Rc::new(|_| {}))
            .register()
            .unwrap();
        let bottom = ClassBuilder::new("Bottom")
            .extends(left)
            .extends(right)
            .register()
            .unwrap();

        let c = class(bottom);
        assert_eq!(c.lineage, vec![left, right, base]);
        // Base's contributions appear once each, not once per path.
        assert_eq!(c.mount_hooks.len(), 3);
        assert_eq!(c.children, vec![ChildSpec::Text("base".into())]);
        assert_eq!(c.listeners.len(), 1);
    }

    #[test]
    fn test_bad_modifier_fails_registration() {
        setup();
        let err = ClassBuilder::new("Broken")
            .listener("click.zoom", "go", Rc::new(|_, _| Ok(())))
            .register()
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownEventModifier(m) if m == "zoom"));
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        setup();
        let err = ClassBuilder::new("Doubled")
            .listener("click", "go", Rc::new(|_, _| Ok(())))
            .listener("click.prevent", "go", Rc::new(|_, _| Ok(())))
            .register()
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateHandler { .. }));
    }

    #[test]
    fn test_hook_chain_most_derived_first() {
        setup();
        let base = ClassBuilder::new("Base")
            .mount_hook(Rc::new(|_| {}))
            .register()
            .unwrap();
        let derived = ClassBuilder::new("Derived")
            .extends(base)
            .mount_hook(Rc::new(|_| {}))
            .register()
            .unwrap();
        assert_eq!(class(derived).mount_hooks.len(), 2);
        assert_eq!(class(base).mount_hooks.len(), 1);
    }
}
