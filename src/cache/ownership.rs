//! Child → parent links discovered from block listings.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use crate::domain::NodeId;

/// Outcome of walking parent links upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// The topmost ancestor. A node with no recorded parent is its own root.
    Node(NodeId),
    /// The walk revisited a node. Never a valid freshness key.
    Cycle,
}

impl Root {
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Cycle => None,
        }
    }
}

/// Map from node id to its immediate parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipIndex {
    parents: HashMap<NodeId, NodeId>,
}

impl OwnershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parents(parents: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut index = Self::new();
        for (child, parent) in parents {
            index.record_child(child, parent);
        }
        index
    }

    /// Upsert `child → parent`; the last writer wins. Self-parenting is
    /// dropped.
    pub fn record_child(&mut self, child: NodeId, parent: NodeId) {
        if child == parent {
            warn!(
                op = "ownership::record_child",
                result = "self_parent_ignored",
                node = %child,
                "Ignoring block listed as its own child"
            );
            return;
        }
        self.parents.insert(child, parent);
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.parents.get(id)
    }

    pub fn find_root(&self, id: &NodeId) -> Root {
        let mut visited = HashSet::new();
        let mut current = id;

        loop {
            if !visited.insert(current) {
                return Root::Cycle;
            }
            match self.parents.get(current) {
                Some(parent) => current = parent,
                None => return Root::Node(current.clone()),
            }
        }
    }

    /// Every node whose parent chain passes through `id`. Terminates on
    /// cyclic input; `id` itself is never included.
    pub fn descendants(&self, id: &NodeId) -> HashSet<NodeId> {
        let mut children_of: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for (child, parent) in &self.parents {
            children_of.entry(parent).or_default().push(child);
        }

        let mut found = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for child in children_of.get(current).into_iter().flatten() {
                if *child != id && found.insert((*child).clone()) {
                    stack.push(*child);
                }
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn clear(&mut self) {
        self.parents.clear();
    }

    /// Sorted copy for persistence.
    pub fn snapshot(&self) -> BTreeMap<NodeId, NodeId> {
        self.parents
            .iter()
            .map(|(child, parent)| (child.clone(), parent.clone()))
            .collect()
    }
}
