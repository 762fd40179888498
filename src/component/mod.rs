//! Component instances and their lifecycle.
//!
//! An instance is constructed from a composed class ([`create`]), lives in
//! a thread-local arena, and moves through
//! `constructed -> mounted -> rendered (0..n) -> unmounted`. Re-mounting an
//! unmounted instance is not supported; [`clone_instance`] produces a fresh
//! instance carrying the same current attribute values.

pub mod lifecycle;
pub mod registry;

use crate::types::{InstanceId, Value};

pub use lifecycle::{Lifecycle, Phase, mount, render_component, unmount};
pub use registry::{
    child_components, clone_instance, collection_of, create, get_attr, is_mounted, node_of,
    set_attr,
};

/// An attribute value supplied at construction.
#[derive(Clone)]
pub enum AttrInit {
    /// A literal value.
    Value(Value),
    /// Two-way model link to `attr` on an existing instance.
    Bind { source: InstanceId, attr: String },
    /// Two-way model link to `attr` on the enclosing parent instance.
    /// Only meaningful inside a declared-children list.
    BindParent(String),
}

impl<T: Into<Value>> From<T> for AttrInit {
    fn from(v: T) -> Self {
        AttrInit::Value(v.into())
    }
}
