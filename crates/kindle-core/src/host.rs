//! The host environment contract and an in-memory host.

use std::fmt::Write as _;
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::component::{ComponentInstance, ComponentManager, InstanceId};
use crate::value::Value;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("node {id} missing")]
    Missing { id: NodeId },

    #[error("node {id} kind mismatch; expected {expected}")]
    KindMismatch { id: NodeId, expected: &'static str },
}

/// Output primitives and lifecycle notifications supplied by the embedder.
pub trait Environment {
    fn create_element(&mut self, tag: &str) -> NodeId;
    fn create_text(&mut self, text: &str) -> NodeId;
    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError>;
    /// Nullish values remove the attribute.
    fn set_attribute(&mut self, element: NodeId, name: &str, value: &Value)
        -> Result<(), HostError>;
    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), HostError>;
    /// Detaches `node` and drops it together with its subtree.
    fn remove(&mut self, node: NodeId) -> Result<(), HostError>;

    fn did_create(&mut self, _instance: &ComponentInstance, _manager: &Rc<dyn ComponentManager>) {}
    fn did_update(&mut self, _instance: &ComponentInstance, _manager: &Rc<dyn ComponentManager>) {}
    fn begin_transaction(&mut self) {}
    fn commit_transaction(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    DidCreate(InstanceId),
    DidUpdate(InstanceId),
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: Rc<str>,
        attributes: IndexMap<Rc<str>, String>,
        children: Vec<NodeId>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: NodeKind,
    parent: Option<NodeId>,
}

/// Arena-backed host used by tests and headless rendering.
///
/// Node `0` is a root element that is never removed.
pub struct MemoryHost {
    nodes: Vec<Option<MemoryNode>>,
    notifications: Vec<Notification>,
    transactions: usize,
    open_transactions: usize,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        let root = MemoryNode {
            kind: NodeKind::Element {
                tag: Rc::from("root"),
                attributes: IndexMap::new(),
                children: Vec::new(),
            },
            parent: None,
        };
        Self {
            nodes: vec![Some(root)],
            notifications: Vec::new(),
            transactions: 0,
            open_transactions: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    fn node(&self, id: NodeId) -> Result<&MemoryNode, HostError> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(HostError::Missing { id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemoryNode, HostError> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(HostError::Missing { id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn tag(&self, id: NodeId) -> Result<&str, HostError> {
        match &self.node(id)?.kind {
            NodeKind::Element { tag, .. } => Ok(&**tag),
            NodeKind::Text(_) => Err(HostError::KindMismatch {
                id,
                expected: "element",
            }),
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Result<Option<&str>, HostError> {
        match &self.node(id)?.kind {
            NodeKind::Element { attributes, .. } => Ok(attributes.get(name).map(String::as_str)),
            NodeKind::Text(_) => Err(HostError::KindMismatch {
                id,
                expected: "element",
            }),
        }
    }

    pub fn text(&self, id: NodeId) -> Result<&str, HostError> {
        match &self.node(id)?.kind {
            NodeKind::Text(text) => Ok(text.as_str()),
            NodeKind::Element { .. } => Err(HostError::KindMismatch { id, expected: "text" }),
        }
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], HostError> {
        match &self.node(id)?.kind {
            NodeKind::Element { children, .. } => Ok(children.as_slice()),
            NodeKind::Text(_) => Ok(&[][..]),
        }
    }

    /// Live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    /// Transactions committed so far.
    pub fn transactions(&self) -> usize {
        self.transactions
    }

    pub fn in_transaction(&self) -> bool {
        self.open_transactions > 0
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(MemoryNode { kind, parent: None }));
        id
    }

    pub fn dump_tree(&self) -> String {
        let mut output = String::new();
        self.dump_node(&mut output, Self::ROOT, 0);
        output
    }

    fn dump_node(&self, output: &mut String, id: NodeId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.nodes.get(id).and_then(Option::as_ref) {
            Some(MemoryNode {
                kind:
                    NodeKind::Element {
                        tag,
                        attributes,
                        children,
                    },
                ..
            }) => {
                let _ = write!(output, "{indent}[{id}] <{tag}");
                for (name, value) in attributes {
                    let _ = write!(output, " {name}={value:?}");
                }
                output.push_str(">\n");
                for child in children {
                    self.dump_node(output, *child, depth + 1);
                }
            }
            Some(MemoryNode {
                kind: NodeKind::Text(text),
                ..
            }) => {
                let _ = writeln!(output, "{indent}[{id}] {text:?}");
            }
            None => {
                let _ = writeln!(output, "{indent}[{id}] (missing)");
            }
        }
    }

    /// Serializes the root's children as markup.
    pub fn render_html(&self) -> String {
        let mut output = String::new();
        if let Ok(children) = self.children(Self::ROOT) {
            for child in children {
                self.render_node(&mut output, *child);
            }
        }
        output
    }

    fn render_node(&self, output: &mut String, id: NodeId) {
        match self.nodes.get(id).and_then(Option::as_ref).map(|node| &node.kind) {
            Some(NodeKind::Element {
                tag,
                attributes,
                children,
            }) => {
                let _ = write!(output, "<{tag}");
                for (name, value) in attributes {
                    let _ = write!(output, " {name}=\"{}\"", escape(value));
                }
                output.push('>');
                for child in children {
                    self.render_node(output, *child);
                }
                let _ = write!(output, "</{tag}>");
            }
            Some(NodeKind::Text(text)) => output.push_str(&escape(text)),
            None => {}
        }
    }

    fn detach(&mut self, id: NodeId) -> Result<(), HostError> {
        let parent = self.node_mut(id)?.parent.take();
        if let Some(parent) = parent {
            if let NodeKind::Element { children, .. } = &mut self.node_mut(parent)?.kind {
                children.retain(|child| *child != id);
            }
        }
        Ok(())
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id).and_then(Option::take) else {
            return;
        };
        if let NodeKind::Element { children, .. } = node.kind {
            for child in children {
                self.drop_subtree(child);
            }
        }
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

impl Environment for MemoryHost {
    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: Rc::from(tag),
            attributes: IndexMap::new(),
            children: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_owned()))
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.node(child)?;
        self.detach(child)?;
        match &mut self.node_mut(parent)?.kind {
            NodeKind::Element { children, .. } => children.push(child),
            NodeKind::Text(_) => {
                return Err(HostError::KindMismatch {
                    id: parent,
                    expected: "element",
                })
            }
        }
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn set_attribute(
        &mut self,
        element: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<(), HostError> {
        match &mut self.node_mut(element)?.kind {
            NodeKind::Element { attributes, .. } => {
                if value.is_nullish() {
                    attributes.shift_remove(name);
                } else {
                    attributes.insert(Rc::from(name), value.to_string());
                }
                Ok(())
            }
            NodeKind::Text(_) => Err(HostError::KindMismatch {
                id: element,
                expected: "element",
            }),
        }
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), HostError> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Text(current) => {
                current.clear();
                current.push_str(text);
                Ok(())
            }
            NodeKind::Element { .. } => Err(HostError::KindMismatch {
                id: node,
                expected: "text",
            }),
        }
    }

    fn remove(&mut self, node: NodeId) -> Result<(), HostError> {
        if node == Self::ROOT {
            return Err(HostError::KindMismatch {
                id: node,
                expected: "removable node",
            });
        }
        self.detach(node)?;
        self.drop_subtree(node);
        Ok(())
    }

    fn did_create(&mut self, instance: &ComponentInstance, _manager: &Rc<dyn ComponentManager>) {
        self.notifications
            .push(Notification::DidCreate(instance.id()));
    }

    fn did_update(&mut self, instance: &ComponentInstance, _manager: &Rc<dyn ComponentManager>) {
        self.notifications
            .push(Notification::DidUpdate(instance.id()));
    }

    fn begin_transaction(&mut self) {
        self.open_transactions += 1;
    }

    fn commit_transaction(&mut self) {
        self.open_transactions = self.open_transactions.saturating_sub(1);
        self.transactions += 1;
    }
}
