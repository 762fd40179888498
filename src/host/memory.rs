//! In-memory reference host.
//!
//! A plain tree of nodes plus a mutation log. The log is what makes the
//! children-incrementality guarantees assertable: a test can clear it, run
//! one container mutation, and count exactly how many host insertions or
//! removals happened.

use std::any::Any;
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::types::{ListenerId, NodeKey};

use super::HostTree;

/// One recorded host mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateElement { node: NodeKey, tag: String },
    CreateText { node: NodeKey, text: String },
    InsertChild { parent: NodeKey, child: NodeKey, index: usize },
    RemoveChild { parent: NodeKey, child: NodeKey },
    SetAttribute { node: NodeKey, name: String, value: String },
    RemoveAttribute { node: NodeKey, name: String },
    SetText { node: NodeKey, text: String },
    AddListener { node: NodeKey, event: String },
    RemoveListener { node: NodeKey, event: String },
}

#[derive(Debug, Default)]
struct Node {
    tag: String,
    text: Option<String>,
    attributes: BTreeMap<String, String>,
    children: Vec<NodeKey>,
    parent: Option<NodeKey>,
    listeners: Vec<(String, ListenerId)>,
}

/// The in-memory host tree. Node 0 is the document.
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: Vec<Node>,
    title: String,
    ops: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut host = Self::default();
        host.nodes.push(Node {
            tag: "#document".to_string(),
            ..Default::default()
        });
        host
    }

    fn alloc(&mut self, node: Node) -> NodeKey {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Take and clear the mutation log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Children of a node, in order.
    pub fn children_of(&self, node: NodeKey) -> Vec<NodeKey> {
        self.nodes.get(node).map(|n| n.children.clone()).unwrap_or_default()
    }

    /// Tag name of a node.
    pub fn tag_of(&self, node: NodeKey) -> Option<&str> {
        self.nodes.get(node).map(|n| n.tag.as_str())
    }

    /// Text content of a text node.
    pub fn text_of(&self, node: NodeKey) -> Option<&str> {
        self.nodes.get(node).and_then(|n| n.text.as_deref())
    }

    /// Attribute value on a node.
    pub fn attribute(&self, node: NodeKey, name: &str) -> Option<&str> {
        self.nodes
            .get(node)
            .and_then(|n| n.attributes.get(name))
            .map(|s| s.as_str())
    }

    /// Listeners registered on a node for an event.
    pub fn listeners_for(&self, node: NodeKey, event: &str) -> Vec<ListenerId> {
        self.nodes
            .get(node)
            .map(|n| {
                n.listeners
                    .iter()
                    .filter(|(name, _)| name == event)
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Render the subtree under `node` as a flat string (debugging aid).
    pub fn to_text(&self, node: NodeKey) -> String {
        let Some(n) = self.nodes.get(node) else {
            return String::new();
        };
        if let Some(text) = &n.text {
            return text.clone();
        }
        n.children.iter().map(|&child| self.to_text(child)).collect()
    }
}

impl HostTree for MemoryHost {
    fn create_element(&mut self, tag: &str) -> NodeKey {
        let node = self.alloc(Node {
            tag: tag.to_string(),
            ..Default::default()
        });
        self.ops.push(HostOp::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    fn create_text(&mut self, text: &str) -> NodeKey {
        let node = self.alloc(Node {
            tag: "#text".to_string(),
            text: Some(text.to_string()),
            ..Default::default()
        });
        self.ops.push(HostOp::CreateText {
            node,
            text: text.to_string(),
        });
        node
    }

    fn insert_child(&mut self, parent: NodeKey, child: NodeKey, index: Option<usize>) -> Result<()> {
        if parent >= self.nodes.len() || child >= self.nodes.len() {
            return Err(EngineError::HostTreeState(format!(
                "insert_child: unknown node (parent={parent}, child={child})"
            )));
        }
        if let Some(old_parent) = self.nodes[child].parent {
            self.nodes[old_parent].children.retain(|&c| c != child);
        }
        let len = self.nodes[parent].children.len();
        let at = index.unwrap_or(len).min(len);
        self.nodes[parent].children.insert(at, child);
        self.nodes[child].parent = Some(parent);
        self.ops.push(HostOp::InsertChild {
            parent,
            child,
            index: at,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<()> {
        let actual = self.nodes.get(child).and_then(|n| n.parent);
        if actual != Some(parent) {
            return Err(EngineError::HostTreeState(format!(
                "remove_child: node {child} is not a child of {parent}"
            )));
        }
        self.nodes[parent].children.retain(|&c| c != child);
        self.nodes[child].parent = None;
        self.ops.push(HostOp::RemoveChild { parent, child });
        Ok(())
    }

    fn set_attribute(&mut self, node: NodeKey, name: &str, value: &str) {
        if let Some(n) = self.nodes.get_mut(node) {
            let unchanged = n.attributes.get(name).is_some_and(|v| v == value);
            if unchanged {
                return;
            }
            n.attributes.insert(name.to_string(), value.to_string());
            self.ops.push(HostOp::SetAttribute {
                node,
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    fn remove_attribute(&mut self, node: NodeKey, name: &str) {
        if let Some(n) = self.nodes.get_mut(node) {
            if n.attributes.remove(name).is_some() {
                self.ops.push(HostOp::RemoveAttribute {
                    node,
                    name: name.to_string(),
                });
            }
        }
    }

    fn set_text(&mut self, node: NodeKey, text: &str) {
        if let Some(n) = self.nodes.get_mut(node) {
            if n.text.as_deref() == Some(text) {
                return;
            }
            n.text = Some(text.to_string());
            self.ops.push(HostOp::SetText {
                node,
                text: text.to_string(),
            });
        }
    }

    fn parent_of(&self, node: NodeKey) -> Option<NodeKey> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    fn query_selector(&mut self, selector: &str) -> Option<NodeKey> {
        if let Some(id) = selector.strip_prefix('#') {
            (0..self.nodes.len()).find(|&key| self.attribute(key, "id") == Some(id))
        } else {
            (0..self.nodes.len()).find(|&key| self.nodes[key].tag == selector)
        }
    }

    fn document(&self) -> NodeKey {
        0
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn add_event_listener(&mut self, node: NodeKey, event: &str, listener: ListenerId) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.listeners.push((event.to_string(), listener));
            self.ops.push(HostOp::AddListener {
                node,
                event: event.to_string(),
            });
        }
    }

    fn remove_event_listener(&mut self, node: NodeKey, event: &str, listener: ListenerId) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.listeners.retain(|(name, id)| !(name == event && *id == listener));
            self.ops.push(HostOp::RemoveListener {
                node,
                event: event.to_string(),
            });
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_mutation() {
        let mut host = MemoryHost::new();
        let div = host.create_element("div");
        let text = host.create_text("hello");

        host.insert_child(0, div, None).unwrap();
        host.insert_child(div, text, None).unwrap();

        assert_eq!(host.children_of(0), vec![div]);
        assert_eq!(host.parent_of(text), Some(div));
        assert_eq!(host.to_text(0), "hello");

        host.remove_child(div, text).unwrap();
        assert!(host.children_of(div).is_empty());
    }

    #[test]
    fn test_indexed_insert() {
        let mut host = MemoryHost::new();
        let a = host.create_element("a");
        let b = host.create_element("b");
        let c = host.create_element("c");

        host.insert_child(0, a, None).unwrap();
        host.insert_child(0, c, None).unwrap();
        host.insert_child(0, b, Some(1)).unwrap();

        assert_eq!(host.children_of(0), vec![a, b, c]);
    }

    #[test]
    fn test_remove_child_mismatch() {
        let mut host = MemoryHost::new();
        let a = host.create_element("a");
        let b = host.create_element("b");
        host.insert_child(0, a, None).unwrap();

        assert!(host.remove_child(a, b).is_err());
    }

    #[test]
    fn test_query_selector() {
        let mut host = MemoryHost::new();
        let root = host.create_element("main");
        host.set_attribute(root, "id", "app");
        host.insert_child(0, root, None).unwrap();

        assert_eq!(host.query_selector("#app"), Some(root));
        assert_eq!(host.query_selector("main"), Some(root));
        assert_eq!(host.query_selector("#missing"), None);
    }

    #[test]
    fn test_ops_log() {
        let mut host = MemoryHost::new();
        let a = host.create_element("a");
        host.insert_child(0, a, None).unwrap();
        host.take_ops();

        host.set_attribute(a, "x", "1");
        host.set_attribute(a, "x", "1"); // unchanged, not logged
        let ops = host.take_ops();
        assert_eq!(ops.len(), 1);
    }
}
