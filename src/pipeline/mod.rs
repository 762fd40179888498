//! Mount pipeline - attaching a component tree to a host document.

mod mount;

pub use mount::{MountHandle, mount};
