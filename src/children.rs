//! Children Container.
//!
//! An ordered, change-tracked sequence of child component instances,
//! declared in a class's children list as a named slot
//! (`ChildDecl::Slot("items")`) and looked up per instance with
//! `registry::collection_of`.
//!
//! Mutations are incremental: once the collection is mounted, each
//! operation mounts exactly the added items at their host-tree index and
//! unmounts exactly the removed ones. Sibling items are never touched.
//! Bulk rebuilds go through [`assign`], which elides the shared prefix and
//! suffix so only the net change hits the host tree, or through a
//! [`silence`] scope that suspends the per-item side effects entirely.
//!
//! Removal fires a separate post-removal notification, once per operation
//! (not once per removed item); derived recomputation such as counters
//! hangs off [`on_change`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::component::lifecycle;
use crate::component::registry;
use crate::component::AttrInit;
use crate::error::{EngineError, Result};
use crate::types::{ClassId, CollectionId, InstanceId, NodeKey};

// =============================================================================
// State
// =============================================================================

type ChangeHandler = Rc<dyn Fn(CollectionId)>;

struct Collection {
    owner: InstanceId,
    /// Position of this collection in the owner's child entries.
    entry: usize,
    items: Vec<InstanceId>,
    mounted: bool,
    parent_node: Option<NodeKey>,
    /// Depth of open silence scopes; nonzero suspends side effects.
    silent: u32,
    on_change: Vec<(String, ChangeHandler)>,
}

thread_local! {
    static COLLECTIONS: RefCell<Vec<Collection>> = const { RefCell::new(Vec::new()) };
}

fn with_collection<R>(id: CollectionId, f: impl FnOnce(&Collection) -> R) -> Option<R> {
    COLLECTIONS.with(|c| c.borrow().get(id).map(f))
}

fn with_collection_mut<R>(id: CollectionId, f: impl FnOnce(&mut Collection) -> R) -> Option<R> {
    COLLECTIONS.with(|c| c.borrow_mut().get_mut(id).map(f))
}

/// Register a new collection owned by `owner` at child-entry `entry`.
/// Called from instance construction for each declared slot.
pub(crate) fn alloc_collection(owner: InstanceId, entry: usize) -> CollectionId {
    COLLECTIONS.with(|c| {
        let mut collections = c.borrow_mut();
        collections.push(Collection {
            owner,
            entry,
            items: Vec::new(),
            mounted: false,
            parent_node: None,
            silent: 0,
            on_change: Vec::new(),
        });
        collections.len() - 1
    })
}

/// Drop every collection (for testing).
pub fn reset_children_state() {
    COLLECTIONS.with(|c| c.borrow_mut().clear());
}

// =============================================================================
// Inspection
// =============================================================================

pub fn items(id: CollectionId) -> Vec<InstanceId> {
    with_collection(id, |c| c.items.clone()).unwrap_or_default()
}

pub fn item_count(id: CollectionId) -> usize {
    with_collection(id, |c| c.items.len()).unwrap_or(0)
}

fn side_effects_live(id: CollectionId) -> bool {
    with_collection(id, |c| c.mounted && c.silent == 0).unwrap_or(false)
}

// =============================================================================
// Notifications
// =============================================================================

/// Register a post-removal handler. Fired once per removing operation,
/// however many items the operation removed.
pub fn on_change(id: CollectionId, handler_name: &str, f: impl Fn(CollectionId) + 'static) -> Result<()> {
    with_collection_mut(id, |c| {
        if c.on_change.iter().any(|(name, _)| name == handler_name) {
            return Err(EngineError::DuplicateHandler {
                event: "post-remove".to_string(),
                handler: handler_name.to_string(),
            });
        }
        c.on_change.push((handler_name.to_string(), Rc::new(f)));
        Ok(())
    })
    .unwrap_or(Ok(()))
}

fn fire_post_remove(id: CollectionId) {
    let handlers: Vec<ChangeHandler> = match with_collection(id, |c| {
        if c.silent > 0 {
            Vec::new()
        } else {
            c.on_change.iter().map(|(_, f)| Rc::clone(f)).collect()
        }
    }) {
        Some(handlers) => handlers,
        None => return,
    };
    for f in handlers {
        f(id);
    }
}

// =============================================================================
// Silence scope
// =============================================================================

/// RAII scope that suspends per-item mount/unmount side effects and
/// post-removal notifications on a collection.
pub struct SilenceGuard {
    id: CollectionId,
}

impl Drop for SilenceGuard {
    fn drop(&mut self) {
        with_collection_mut(self.id, |c| c.silent = c.silent.saturating_sub(1));
    }
}

/// Open a silence scope. Used during bulk rebuilds; pair with [`assign`]
/// to apply the net change afterwards.
pub fn silence(id: CollectionId) -> SilenceGuard {
    with_collection_mut(id, |c| c.silent += 1);
    SilenceGuard { id }
}

// =============================================================================
// Mutation
// =============================================================================

/// Create an item owned by the collection's component without inserting
/// it. Building blocks for [`assign`]-style rebuilds.
pub fn create_item(id: CollectionId, class: ClassId, kwargs: Vec<(String, AttrInit)>) -> Result<InstanceId> {
    let owner = with_collection(id, |c| c.owner)
        .ok_or_else(|| EngineError::HostTreeState(format!("unknown collection {id}")))?;
    registry::create_with_parent(class, kwargs, Some(owner))
}

/// Create and append an item.
pub fn push(id: CollectionId, class: ClassId, kwargs: Vec<(String, AttrInit)>) -> Result<InstanceId> {
    let position = item_count(id);
    insert(id, position, class, kwargs)
}

/// Create an item and insert it at `position`.
pub fn insert(
    id: CollectionId,
    position: usize,
    class: ClassId,
    kwargs: Vec<(String, AttrInit)>,
) -> Result<InstanceId> {
    let item = create_item(id, class, kwargs)?;
    with_collection_mut(id, |c| {
        let at = position.min(c.items.len());
        c.items.insert(at, item);
    });
    if side_effects_live(id) {
        mount_item(id, item, position)?;
    }
    Ok(item)
}

/// Remove the item at `position` and unmount it.
pub fn remove(id: CollectionId, position: usize) -> Result<InstanceId> {
    let item = with_collection_mut(id, |c| {
        if position < c.items.len() {
            Some(c.items.remove(position))
        } else {
            None
        }
    })
    .flatten()
    .ok_or_else(|| {
        EngineError::HostTreeState(format!("collection {id} has no item at {position}"))
    })?;

    if side_effects_live(id) {
        lifecycle::unmount(item);
    }
    fire_post_remove(id);
    Ok(item)
}

/// Remove a specific item instance.
pub fn remove_item(id: CollectionId, item: InstanceId) -> Result<InstanceId> {
    let position = with_collection(id, |c| c.items.iter().position(|&i| i == item))
        .flatten()
        .ok_or_else(|| {
            EngineError::HostTreeState(format!("instance {item} is not in collection {id}"))
        })?;
    remove(id, position)
}

/// Remove every item, unmounting in reverse order. One post-removal
/// notification for the whole operation.
pub fn clear(id: CollectionId) {
    let removed = with_collection_mut(id, |c| std::mem::take(&mut c.items)).unwrap_or_default();
    if removed.is_empty() {
        return;
    }
    if side_effects_live(id) {
        for item in removed.iter().rev() {
            lifecycle::unmount(*item);
        }
    }
    fire_post_remove(id);
}

/// Replace the whole sequence with `new_items`, applying only the net
/// change: the shared prefix and suffix keep their mounted state, the old
/// middle unmounts (in reverse), the new middle mounts in order.
///
/// Items may not move across the replaced region; an old item that
/// reappears at a different position is unmounted like any other removal.
pub fn assign(id: CollectionId, new_items: Vec<InstanceId>) -> Result<()> {
    let old = items(id);

    let mut prefix = 0;
    while prefix < old.len() && prefix < new_items.len() && old[prefix] == new_items[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new_items.len() - prefix
        && old[old.len() - 1 - suffix] == new_items[new_items.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let removed: Vec<InstanceId> = old[prefix..old.len() - suffix].to_vec();
    let added: Vec<(usize, InstanceId)> = new_items[prefix..new_items.len() - suffix]
        .iter()
        .enumerate()
        .map(|(offset, &item)| (prefix + offset, item))
        .collect();

    with_collection_mut(id, |c| c.items = new_items);

    if side_effects_live(id) {
        for item in removed.iter().rev() {
            lifecycle::unmount(*item);
        }
        for (position, item) in &added {
            mount_item(id, *item, *position)?;
        }
    }
    if !removed.is_empty() {
        fire_post_remove(id);
    }
    Ok(())
}

fn mount_item(id: CollectionId, item: InstanceId, position: usize) -> Result<()> {
    let (owner, entry, parent_node) =
        with_collection(id, |c| (c.owner, c.entry, c.parent_node)).ok_or_else(|| {
            EngineError::HostTreeState(format!("unknown collection {id}"))
        })?;
    let parent_node = parent_node.ok_or_else(|| {
        EngineError::HostTreeState(format!("collection {id} is mounted without a host node"))
    })?;

    let base = registry::host_base_index(owner, entry);
    lifecycle::mount(item, parent_node, Some(base + position))?;
    if registry::with_instance(owner, |inst| inst.mount_finished).unwrap_or(false) {
        lifecycle::render_component(item);
    }
    Ok(())
}

// =============================================================================
// Lifecycle integration
// =============================================================================

pub(crate) fn mount_collection(id: CollectionId, parent_node: NodeKey, base: usize) -> Result<()> {
    let item_list = with_collection_mut(id, |c| {
        c.mounted = true;
        c.parent_node = Some(parent_node);
        c.items.clone()
    })
    .unwrap_or_default();

    for (offset, item) in item_list.iter().enumerate() {
        lifecycle::mount(*item, parent_node, Some(base + offset))?;
    }
    Ok(())
}

pub(crate) fn unmount_collection(id: CollectionId) {
    let item_list = with_collection_mut(id, |c| {
        c.mounted = false;
        c.items.clone()
    })
    .unwrap_or_default();

    for item in item_list.iter().rev() {
        lifecycle::unmount(*item);
    }
}

pub(crate) fn render_collection(id: CollectionId) {
    for item in items(id) {
        lifecycle::render_component(item);
    }
}

// =============================================================================
// Tests
// =============================================================================
