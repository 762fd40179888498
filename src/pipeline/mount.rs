//! Root mounting.
//!
//! [`mount`] is the application entry point: it resolves the host selector,
//! attaches the root instance, and runs the first paint. Everything after
//! that is driven by attribute writes and event dispatch.

use crate::component::{lifecycle, registry};
use crate::compose;
use crate::error::{EngineError, Result};
use crate::host;
use crate::types::InstanceId;

/// Handle to a mounted root component.
#[derive(Debug)]
pub struct MountHandle {
    root: InstanceId,
}

impl MountHandle {
    pub fn root(&self) -> InstanceId {
        self.root
    }

    /// Tear the tree down.
    pub fn unmount(self) {
        lifecycle::unmount(self.root);
    }
}

/// Mount `root` into the host node matched by `selector` and render it.
///
/// If the document has no title yet, the root component's class name is
/// used as a default.
pub fn mount(root: InstanceId, selector: &str) -> Result<MountHandle> {
    let target = host::with(|h| h.query_selector(selector)).ok_or_else(|| {
        EngineError::HostTreeState(format!("mount point `{selector}` not found in host tree"))
    })?;

    lifecycle::mount(root, target, None)?;
    lifecycle::render_component(root);

    if host::with(|h| h.title()).is_empty() {
        if let Some(class_id) = registry::class_of(root) {
            let name = compose::class(class_id).name.clone();
            tracing::debug!(title = %name, "document title unset; defaulting to root component name");
            host::with(|h| h.set_title(&name));
        }
    }

    Ok(MountHandle { root })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::create;
    use crate::compose::{ChildDecl, ClassBuilder};
    use crate::host::HostTree;

    fn setup() {
        crate::compose::reset_compose_state();
        crate::host::reset_host();
        crate::events::reset_events_state();
        crate::render::reset_render_state();
        crate::component::registry::reset_registry_state();
        crate::component::lifecycle::reset_lifecycle_state();
    }

    fn make_app_node() {
        host::with_memory(|h| {
            let root = h.create_element("main");
            h.set_attribute(root, "id", "app");
            h.insert_child(0, root, None).unwrap();
        });
    }

    #[test]
    fn test_mount_attaches_and_paints() {
        setup();
        make_app_node();
        let class = ClassBuilder::new("Hello")
            .children(vec![ChildDecl::Text("hi".into())])
            .register()
            .unwrap();
        let root = create(class, vec![]).unwrap();

        let handle = mount(root, "#app").unwrap();

        let text = host::with_memory(|h| h.to_text(0));
        assert_eq!(text, "hi");
        assert_eq!(host::with(|h| h.title()), "hello");

        handle.unmount();
        assert_eq!(host::with_memory(|h| h.to_text(0)), "");
    }

    #[test]
    fn test_missing_mount_point() {
        setup();
        let class = ClassBuilder::new("Hello").register().unwrap();
        let root = create(class, vec![]).unwrap();
        assert!(matches!(
            mount(root, "#nowhere"),
            Err(EngineError::HostTreeState(_))
        ));
    }

    #[test]
    fn test_existing_title_kept() {
        setup();
        make_app_node();
        host::with(|h| h.set_title("My App"));
        let class = ClassBuilder::new("Hello").register().unwrap();
        let root = create(class, vec![]).unwrap();

        mount(root, "#app").unwrap();
        assert_eq!(host::with(|h| h.title()), "My App");
    }
}
