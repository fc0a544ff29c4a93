//! Output cursor, block bounds and the updating opcodes that patch output.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::cache::{Validation, ValueCache};
use crate::component::ElementOperations;
use crate::error::{UnbalancedRegionError, VmError};
use crate::host::NodeId;
use crate::tag::Tag;
use crate::update::{UpdatingOpcode, UpdatingVm};

/// Top-level nodes rendered by one block, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounds {
    parent: NodeId,
    nodes: SmallVec<[NodeId; 4]>,
}

impl Bounds {
    pub fn new(parent: NodeId) -> Self {
        Self {
            parent,
            nodes: SmallVec::new(),
        }
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

struct BlockTracker {
    depth: usize,
    bounds: Bounds,
}

pub(crate) struct Constructing {
    pub(crate) node: NodeId,
    pub(crate) operations: ElementOperations,
    pub(crate) from_component: bool,
}

/// Open elements, the element under construction and open blocks.
///
/// The bottom entry of `elements` is the render parent and is never closed.
pub(crate) struct ElementStack {
    elements: Vec<NodeId>,
    constructing: Option<Constructing>,
    pending_operations: Option<ElementOperations>,
    blocks: Vec<BlockTracker>,
}

impl ElementStack {
    pub(crate) fn new(parent: NodeId) -> Self {
        Self {
            elements: vec![parent],
            constructing: None,
            pending_operations: None,
            blocks: Vec::new(),
        }
    }

    pub(crate) fn parent(&self) -> NodeId {
        // `elements` is never empty: `close` refuses to pop the render parent.
        self.elements.last().copied().unwrap_or_default()
    }

    pub(crate) fn depth(&self) -> usize {
        self.elements.len()
    }

    pub(crate) fn block_depth(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn ensure_not_constructing(&self) -> Result<(), UnbalancedRegionError> {
        match &self.constructing {
            Some(constructing) => Err(UnbalancedRegionError::ElementAlreadyConstructing {
                element: constructing.node,
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn did_append_node(&mut self, node: NodeId) {
        let depth = self.elements.len();
        if let Some(block) = self.blocks.last_mut() {
            if block.depth == depth {
                block.bounds.nodes.push(node);
            }
        }
    }

    pub(crate) fn set_pending_operations(&mut self) {
        self.pending_operations = Some(ElementOperations::new());
    }

    pub(crate) fn open(&mut self, node: NodeId) -> Result<(), UnbalancedRegionError> {
        self.ensure_not_constructing()?;
        let pending = self.pending_operations.take();
        self.constructing = Some(Constructing {
            node,
            from_component: pending.is_some(),
            operations: pending.unwrap_or_default(),
        });
        Ok(())
    }

    pub(crate) fn constructing_mut(&mut self) -> Result<&mut Constructing, UnbalancedRegionError> {
        self.constructing
            .as_mut()
            .ok_or(UnbalancedRegionError::NoConstructingElement)
    }

    pub(crate) fn flush(&mut self) -> Result<Constructing, UnbalancedRegionError> {
        let constructing = self
            .constructing
            .take()
            .ok_or(UnbalancedRegionError::NoConstructingElement)?;
        self.elements.push(constructing.node);
        Ok(constructing)
    }

    pub(crate) fn close(&mut self) -> Result<NodeId, UnbalancedRegionError> {
        self.ensure_not_constructing()?;
        if self.elements.len() <= 1 {
            return Err(UnbalancedRegionError::ElementUnderflow);
        }
        self.elements
            .pop()
            .ok_or(UnbalancedRegionError::ElementUnderflow)
    }

    pub(crate) fn push_block(&mut self) {
        self.blocks.push(BlockTracker {
            depth: self.elements.len(),
            bounds: Bounds::new(self.parent()),
        });
    }

    /// Closes the innermost block. Its nodes also belong to an enclosing block
    /// opened at the same element depth.
    pub(crate) fn pop_block(&mut self) -> Result<Bounds, UnbalancedRegionError> {
        let block = self
            .blocks
            .pop()
            .ok_or(UnbalancedRegionError::BlockUnderflow)?;
        if let Some(enclosing) = self.blocks.last_mut() {
            if enclosing.depth == block.depth {
                enclosing
                    .bounds
                    .nodes
                    .extend(block.bounds.nodes.iter().copied());
            }
        }
        Ok(block.bounds)
    }
}

/// Rewrites a text node when its reference produces a new value.
pub(crate) struct UpdateText {
    pub(crate) node: NodeId,
    pub(crate) tag: Tag,
    pub(crate) cache: RefCell<ValueCache>,
}

impl UpdatingOpcode for UpdateText {
    fn kind(&self) -> &'static str {
        "UpdateText"
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn evaluate(&self, vm: &mut UpdatingVm<'_>) -> Result<(), VmError> {
        let validation = self.cache.borrow_mut().revalidate()?;
        if let Validation::Changed(value) = validation {
            vm.env().set_text(self.node, &value.to_string())?;
        }
        Ok(())
    }

    fn describe(&self) -> Vec<String> {
        vec![format!("node={}", self.node)]
    }
}

/// Rewrites one attribute when its reference produces a new value.
pub(crate) struct UpdateAttribute {
    pub(crate) element: NodeId,
    pub(crate) name: Rc<str>,
    pub(crate) tag: Tag,
    pub(crate) cache: RefCell<ValueCache>,
}

impl UpdatingOpcode for UpdateAttribute {
    fn kind(&self) -> &'static str {
        "UpdateAttribute"
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn evaluate(&self, vm: &mut UpdatingVm<'_>) -> Result<(), VmError> {
        let validation = self.cache.borrow_mut().revalidate()?;
        if let Validation::Changed(value) = validation {
            vm.env().set_attribute(self.element, &self.name, &value)?;
        }
        Ok(())
    }

    fn describe(&self) -> Vec<String> {
        vec![format!("node={}", self.element), format!("name={}", self.name)]
    }
}
