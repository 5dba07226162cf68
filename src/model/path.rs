//! Path: per-branch traversal context.

use std::sync::Arc;

use super::{Node, PropertyMap, Value};

/// A branch of a query: a variable snapshot plus the nodes visited so far.
///
/// Paths are never mutated once shared. `fork` returns a new path with one
/// more hop, so sibling branches cannot observe each other's changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    vars: Arc<PropertyMap>,
    nodes: Arc<[Node]>,
}

impl Path {
    pub fn new(vars: PropertyMap, node: Node) -> Self {
        Self { vars: Arc::new(vars), nodes: Arc::from(vec![node]) }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn start(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn end(&self) -> &Node {
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn vars(&self) -> &PropertyMap {
        &self.vars
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// A new path extended by one hop. The variable snapshot is shared
    /// read-only with the parent.
    pub fn fork(&self, node: Node) -> Path {
        let mut nodes = Vec::with_capacity(self.nodes.len() + 1);
        nodes.extend(self.nodes.iter().cloned());
        nodes.push(node);
        Path { vars: Arc::clone(&self.vars), nodes: Arc::from(nodes) }
    }

    /// A new path with one variable changed; the parent keeps its own.
    pub fn with_var(&self, name: impl Into<String>, value: impl Into<Value>) -> Path {
        let mut vars = (*self.vars).clone();
        vars.insert(name.into(), value.into());
        Path { vars: Arc::new(vars), nodes: Arc::clone(&self.nodes) }
    }
}
