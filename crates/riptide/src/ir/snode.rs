//! Structured-node registry.
//!
//! A structured node (snode) is a tensor field or one of the auxiliary
//! per-field structures the runtime keeps next to it (activation list, mask).
//! The registry owns the tree; everything else refers to snodes by handle.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SNodeId(pub u32);

#[derive(Debug, Clone)]
pub struct SNode {
    pub name: String,
    pub parent: Option<SNodeId>,
}

#[derive(Debug, Default)]
pub struct SNodeRegistry {
    nodes: Vec<SNode>,
}

impl SNodeRegistry {
    pub fn new() -> Self {
        SNodeRegistry::default()
    }

    pub fn add_root(&mut self, name: impl Into<String>) -> SNodeId {
        self.push(SNode {
            name: name.into(),
            parent: None,
        })
    }

    pub fn add_child(&mut self, parent: SNodeId, name: impl Into<String>) -> SNodeId {
        assert!(
            (parent.0 as usize) < self.nodes.len(),
            "parent snode {parent:?} is not registered"
        );
        self.push(SNode {
            name: name.into(),
            parent: Some(parent),
        })
    }

    fn push(&mut self, node: SNode) -> SNodeId {
        let id = SNodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: SNodeId) -> &SNode {
        &self.nodes[id.0 as usize]
    }

    pub fn parent(&self, id: SNodeId) -> Option<SNodeId> {
        self.get(id).parent
    }

    pub fn name(&self, id: SNodeId) -> &str {
        &self.get(id).name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
