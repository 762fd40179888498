//! Attribute Slots - reactive, typed bindings attached to component classes.
//!
//! A slot is created once at class-build time and lives for the process.
//! Its *values* live somewhere else entirely: a cache keyed by instance
//! identity, or (for `STATIC` slots) a single cell shared by every instance
//! of the class. The two strategies sit behind one interface, so nothing
//! downstream cares which one a slot uses.
//!
//! Writes are change-detected: setting the current value again is a no-op
//! and fires no handlers. A real change fires the slot's `change` handlers
//! in registration order and then, if the slot is `NOTIFY`, hands the owning
//! instance to the render dependency tracker.
//!
//! # Example
//!
//! ```ignore
//! use wisp_ui::attrs::{attr, state};
//!
//! let class = ClassBuilder::new("counter")
//!     .attr("label", attr("Counter"))
//!     .attr("count", state(0))
//!     .register()?;
//! ```

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::error::{EngineError, Result};
use crate::render;
use crate::types::{DeclaredType, InstanceId, Value};

// =============================================================================
// Flags
// =============================================================================

bitflags! {
    /// Behavior flags of a slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotFlags: u8 {
        /// Writable at most once (after a non-null value exists, writes fail).
        const CONST = 1 << 0;
        /// A value must be provided at construction.
        const REQUIRED = 1 << 1;
        /// Changes notify the render dependency tracker.
        const NOTIFY = 1 << 2;
        /// One value cell shared by every instance of the class.
        const STATIC = 1 << 3;
        /// Propagated from parent to child at link time.
        const MOVE_ON = 1 << 4;
        /// Rendered into the host node as an attribute.
        const VIEW = 1 << 5;
    }
}

/// Where a write came from. Model-propagation writes skip echo-tagged
/// handlers, which is what breaks the two-way binding ping-pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    External,
    Model,
}

// =============================================================================
// Handlers
// =============================================================================

pub type SlotHandlerFn = Rc<dyn Fn(InstanceId, &Value)>;

struct SlotHandler {
    name: String,
    echo: bool,
    f: SlotHandlerFn,
}

// =============================================================================
// Storage
// =============================================================================

enum Storage {
    /// Cache keyed by instance identity. Entries appear on first write and
    /// are destroyed when the owning instance unmounts.
    PerInstance(RefCell<HashMap<InstanceId, Value>>),
    /// One cell shared across all instances. Mutation is globally visible;
    /// this is the deliberate cross-component synchronization channel.
    Shared(RefCell<Option<Value>>),
}

// =============================================================================
// AttributeSlot
// =============================================================================

/// A reactive attribute binding. Shared (`Rc`) across the classes that
/// inherit it; value caches are keyed by instance, so sharing the slot
/// object never shares values.
pub struct AttributeSlot {
    name: OnceCell<String>,
    initial: Value,
    ty: DeclaredType,
    flags: SlotFlags,
    model: Option<String>,
    allowed: Option<Vec<Value>>,
    handlers: RefCell<IndexMap<String, Vec<SlotHandler>>>,
    storage: Storage,
}

impl AttributeSlot {
    /// The kebab-cased name, or `"?"` before class build assigns one.
    pub fn name(&self) -> String {
        self.name.get().cloned().unwrap_or_else(|| "?".to_string())
    }

    /// Assign the name. First assignment wins; the name never changes after.
    pub(crate) fn set_name(&self, name: &str) {
        let _ = self.name.set(name.to_string());
    }

    pub fn flags(&self) -> SlotFlags {
        self.flags
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.ty
    }

    pub fn model_channel(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Installation/resolution priority: move-on links must exist before
    /// model wiring, so move-on sorts first and modelled slots last.
    pub fn priority(&self) -> u8 {
        if self.flags.contains(SlotFlags::MOVE_ON) {
            0
        } else if self.model.is_some() {
            2
        } else {
            1
        }
    }

    /// Read the value for `instance`, falling back to the declared initial.
    ///
    /// A read performed while another instance is rendering records that
    /// renderer as a dependent of `instance` (see the render tracker).
    pub fn get(&self, instance: InstanceId) -> Value {
        render::record_read(instance);
        self.peek(instance)
    }

    /// Current value without touching the dependency tracker. Change
    /// detection in writes goes through here; a write is not a read.
    fn peek(&self, instance: InstanceId) -> Value {
        match &self.storage {
            Storage::PerInstance(cache) => cache
                .borrow()
                .get(&instance)
                .cloned()
                .unwrap_or_else(|| self.initial.clone()),
            Storage::Shared(cell) => cell
                .borrow()
                .clone()
                .unwrap_or_else(|| self.initial.clone()),
        }
    }

    /// Write a value on behalf of application code.
    pub fn set(&self, instance: InstanceId, value: Value) -> Result<()> {
        self.set_with_origin(instance, value, WriteOrigin::External)
    }

    pub(crate) fn set_with_origin(
        &self,
        instance: InstanceId,
        value: Value,
        origin: WriteOrigin,
    ) -> Result<()> {
        let current = self.peek(instance);
        if current == value {
            return Ok(());
        }

        if self.flags.contains(SlotFlags::CONST) && self.has_cached_value(instance) {
            return Err(EngineError::ConstAttributeReassigned(self.name()));
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(&value) {
                return Err(EngineError::InvalidValue {
                    name: self.name(),
                    value,
                    allowed: allowed.clone(),
                });
            }
        }

        match &self.storage {
            Storage::PerInstance(cache) => {
                cache.borrow_mut().insert(instance, value.clone());
            }
            Storage::Shared(cell) => {
                *cell.borrow_mut() = Some(value.clone());
            }
        }

        self.fire("change", instance, &value, origin);

        if self.flags.contains(SlotFlags::NOTIFY) {
            render::notify_change(instance);
        }

        Ok(())
    }

    /// Drop the cached value for `instance`. Static slots keep their shared
    /// cell (use [`AttributeSlot::clear_shared`] to reset those).
    pub fn delete(&self, instance: InstanceId) {
        if let Storage::PerInstance(cache) = &self.storage {
            cache.borrow_mut().remove(&instance);
        }
    }

    /// Reset the shared cell of a static slot.
    pub fn clear_shared(&self) {
        if let Storage::Shared(cell) = &self.storage {
            *cell.borrow_mut() = None;
        }
    }

    fn has_cached_value(&self, instance: InstanceId) -> bool {
        match &self.storage {
            Storage::PerInstance(cache) => cache
                .borrow()
                .get(&instance)
                .is_some_and(|v| !v.is_null()),
            Storage::Shared(cell) => cell.borrow().as_ref().is_some_and(|v| !v.is_null()),
        }
    }

    /// Register a change handler under `event` (usually `"change"`).
    /// Registering the same handler name twice for one event is an error.
    pub fn on(&self, event: &str, handler_name: &str, f: SlotHandlerFn) -> Result<()> {
        self.on_tagged(event, handler_name, false, f)
    }

    pub(crate) fn on_tagged(
        &self,
        event: &str,
        handler_name: &str,
        echo: bool,
        f: SlotHandlerFn,
    ) -> Result<()> {
        let mut handlers = self.handlers.borrow_mut();
        let list = handlers.entry(event.to_string()).or_default();
        if list.iter().any(|h| h.name == handler_name) {
            return Err(EngineError::DuplicateHandler {
                event: event.to_string(),
                handler: handler_name.to_string(),
            });
        }
        list.push(SlotHandler {
            name: handler_name.to_string(),
            echo,
            f,
        });
        Ok(())
    }

    /// Remove a named handler (model links detach these at unmount).
    pub(crate) fn remove_handler(&self, event: &str, handler_name: &str) {
        let mut handlers = self.handlers.borrow_mut();
        if let Some(list) = handlers.get_mut(event) {
            list.retain(|h| h.name != handler_name);
        }
    }

    /// Fire handlers for `event` in registration order. Echo-tagged handlers
    /// are skipped for model-attributed writes.
    pub(crate) fn fire(&self, event: &str, instance: InstanceId, value: &Value, origin: WriteOrigin) {
        // Collect first: a handler may register or remove handlers.
        let to_call: Vec<SlotHandlerFn> = {
            let handlers = self.handlers.borrow();
            match handlers.get(event) {
                Some(list) => list
                    .iter()
                    .filter(|h| !(h.echo && origin == WriteOrigin::Model))
                    .map(|h| Rc::clone(&h.f))
                    .collect(),
                None => Vec::new(),
            }
        };
        for f in to_call {
            f(instance, value);
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Declarative slot descriptor consumed by the class composition step.
#[derive(Clone)]
pub struct SlotBuilder {
    initial: Value,
    ty: Option<DeclaredType>,
    flags: SlotFlags,
    model: Option<String>,
    allowed: Option<Vec<Value>>,
}

/// A reactive state slot: changes notify the dependency tracker.
pub fn state(default: impl Into<Value>) -> SlotBuilder {
    SlotBuilder {
        initial: default.into(),
        ty: None,
        flags: SlotFlags::NOTIFY,
        model: None,
        allowed: None,
    }
}

/// A host-visible attribute slot: rendered onto the host node.
pub fn attr(default: impl Into<Value>) -> SlotBuilder {
    SlotBuilder {
        initial: default.into(),
        ty: None,
        flags: SlotFlags::VIEW,
        model: None,
        allowed: None,
    }
}

impl SlotBuilder {
    pub fn required(mut self) -> Self {
        self.flags |= SlotFlags::REQUIRED;
        self
    }

    pub fn constant(mut self) -> Self {
        self.flags |= SlotFlags::CONST;
        self
    }

    /// Share one value cell across every instance of the class.
    pub fn static_shared(mut self) -> Self {
        self.flags |= SlotFlags::STATIC;
        self
    }

    /// Propagate this slot from parent to child instances at link time.
    pub fn move_on(mut self) -> Self {
        self.flags |= SlotFlags::MOVE_ON;
        self
    }

    pub fn notify(mut self) -> Self {
        self.flags |= SlotFlags::NOTIFY;
        self
    }

    pub fn view(mut self) -> Self {
        self.flags |= SlotFlags::VIEW;
        self
    }

    /// Two-way model binding over the given event channel.
    pub fn model(mut self, event: &str) -> Self {
        self.model = Some(event.to_string());
        self
    }

    /// Constrain values to an enumerated set.
    pub fn one_of(mut self, allowed: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(allowed.into_iter().collect());
        self
    }

    pub fn typed(mut self, ty: DeclaredType) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Finalize into a slot. The name is kebab-cased by the caller
    /// (composition) before this point.
    pub(crate) fn build(self, name: &str) -> Rc<AttributeSlot> {
        let inferred = self.initial.type_of();
        let ty = match self.ty {
            Some(declared) => {
                if declared != DeclaredType::Untyped
                    && inferred != DeclaredType::Untyped
                    && declared != inferred
                {
                    // Unresolvable declaration: fall back to untyped instead
                    // of failing the class build.
                    tracing::warn!(
                        slot = name,
                        ?declared,
                        default = ?inferred,
                        "declared type conflicts with default value; slot is untyped"
                    );
                    DeclaredType::Untyped
                } else {
                    declared
                }
            }
            None => inferred,
        };

        let storage = if self.flags.contains(SlotFlags::STATIC) {
            Storage::Shared(RefCell::new(None))
        } else {
            Storage::PerInstance(RefCell::new(HashMap::new()))
        };

        let slot = AttributeSlot {
            name: OnceCell::new(),
            initial: self.initial,
            ty,
            flags: self.flags,
            model: self.model,
            allowed: self.allowed,
            handlers: RefCell::new(IndexMap::new()),
            storage,
        };
        slot.set_name(name);
        Rc::new(slot)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn plain_slot(name: &str, builder: SlotBuilder) -> Rc<AttributeSlot> {
        builder.build(name)
    }

    #[test]
    fn test_get_defaults_to_initial() {
        let slot = plain_slot("count", state(0));
        assert_eq!(slot.get(1), Value::Int(0));
        assert_eq!(slot.get(2), Value::Int(0));
    }

    #[test]
    fn test_per_instance_isolation() {
        let slot = plain_slot("count", state(0));
        slot.set(1, Value::Int(5)).unwrap();
        assert_eq!(slot.get(1), Value::Int(5));
        assert_eq!(slot.get(2), Value::Int(0));
    }

    #[test]
    fn test_static_slot_shares_one_cell() {
        let slot = plain_slot("shared", state(0).static_shared());
        slot.set(1, Value::Int(7)).unwrap();
        assert_eq!(slot.get(2), Value::Int(7));

        slot.clear_shared();
        assert_eq!(slot.get(2), Value::Int(0));
    }

    #[test]
    fn test_idempotent_write_fires_once() {
        let slot = plain_slot("count", state(0));
        let fired = Rc::new(Cell::new(0));
        let fired_clone = fired.clone();
        slot.on(
            "change",
            "counter",
            Rc::new(move |_, _| fired_clone.set(fired_clone.get() + 1)),
        )
        .unwrap();

        slot.set(1, Value::Int(3)).unwrap();
        slot.set(1, Value::Int(3)).unwrap();
        assert_eq!(fired.get(), 1);

        slot.set(1, Value::Int(4)).unwrap();
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn test_const_enforcement() {
        let slot = plain_slot("token", state(Value::Null).constant());
        slot.set(1, Value::from("first")).unwrap();
        let err = slot.set(1, Value::from("second")).unwrap_err();
        assert!(matches!(err, EngineError::ConstAttributeReassigned(_)));
        assert_eq!(slot.get(1), Value::from("first"));
    }

    #[test]
    fn test_enum_constraint() {
        let slot = plain_slot(
            "size",
            attr("small").one_of([Value::from("small"), Value::from("large")]),
        );
        slot.set(1, Value::from("large")).unwrap();
        let err = slot.set(1, Value::from("medium")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidValue { .. }));
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let slot = plain_slot("count", state(0));
        slot.on("change", "h", Rc::new(|_, _| {})).unwrap();
        let err = slot.on("change", "h", Rc::new(|_, _| {})).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateHandler { .. }));
    }

    #[test]
    fn test_echo_handlers_skipped_for_model_writes() {
        let slot = plain_slot("value", state(""));
        let echoes = Rc::new(Cell::new(0));
        let plain = Rc::new(Cell::new(0));
        let echoes_clone = echoes.clone();
        let plain_clone = plain.clone();

        slot.on_tagged(
            "change",
            "echo",
            true,
            Rc::new(move |_, _| echoes_clone.set(echoes_clone.get() + 1)),
        )
        .unwrap();
        slot.on(
            "change",
            "plain",
            Rc::new(move |_, _| plain_clone.set(plain_clone.get() + 1)),
        )
        .unwrap();

        slot.set_with_origin(1, Value::from("a"), WriteOrigin::Model)
            .unwrap();
        assert_eq!(echoes.get(), 0);
        assert_eq!(plain.get(), 1);

        slot.set(1, Value::from("b")).unwrap();
        assert_eq!(echoes.get(), 1);
        assert_eq!(plain.get(), 2);
    }

    #[test]
    fn test_delete_restores_initial() {
        let slot = plain_slot("count", state(10));
        slot.set(1, Value::Int(99)).unwrap();
        slot.delete(1);
        assert_eq!(slot.get(1), Value::Int(10));
    }

    #[test]
    fn test_priority_ordering() {
        assert_eq!(plain_slot("a", state(0).move_on()).priority(), 0);
        assert_eq!(plain_slot("b", state(0)).priority(), 1);
        assert_eq!(plain_slot("c", state(0).model("change")).priority(), 2);
    }

    #[test]
    fn test_type_conflict_falls_back_to_untyped() {
        let slot = plain_slot("odd", state(5).typed(DeclaredType::Str));
        assert_eq!(slot.declared_type(), DeclaredType::Untyped);
    }
}
