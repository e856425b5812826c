//! Decides whether a cached block listing may be served.
//!
//! Two timestamp maps are kept:
//!
//! - `last_modified_at`: the authoritative edit time of a page, learned only
//!   from page listings.
//! - `cached_as_of`: for every node whose children are cached, the root's
//!   authoritative time at the moment the entry was written.
//!
//! An entry is valid only when both are present and exactly equal. A newer,
//! older or missing authoritative time all force a refetch.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::domain::{NodeId, Timestamp};

use super::ownership::{OwnershipIndex, Root};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshnessOracle {
    last_modified_at: HashMap<NodeId, Timestamp>,
    cached_as_of: HashMap<NodeId, Timestamp>,
}

impl FreshnessOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_authoritative(&mut self, id: NodeId, timestamp: Timestamp) {
        self.last_modified_at.insert(id, timestamp);
    }

    /// Stamp the cache entry of `id` and return the previous stamp.
    pub fn record_cached(&mut self, id: NodeId, timestamp: Timestamp) -> Option<Timestamp> {
        self.cached_as_of.insert(id, timestamp)
    }

    /// Drop the stamp of `id`, making its entries invalid until refetched.
    pub fn forget_cached(&mut self, id: &NodeId) -> Option<Timestamp> {
        self.cached_as_of.remove(id)
    }

    pub fn authoritative(&self, id: &NodeId) -> Option<Timestamp> {
        self.last_modified_at.get(id).copied()
    }

    pub fn cached_as_of(&self, id: &NodeId) -> Option<Timestamp> {
        self.cached_as_of.get(id).copied()
    }

    /// The authoritative time of the page owning `id`, if both are known.
    pub fn authoritative_for(&self, id: &NodeId, index: &OwnershipIndex) -> Option<Timestamp> {
        match index.find_root(id) {
            Root::Node(root) => self.authoritative(&root),
            Root::Cycle => None,
        }
    }

    pub fn is_valid(&self, id: &NodeId, index: &OwnershipIndex) -> bool {
        let root = match index.find_root(id) {
            Root::Node(root) => root,
            Root::Cycle => {
                warn!(
                    op = "freshness::is_valid",
                    result = "cycle",
                    node = %id,
                    "Ownership cycle detected; forcing refetch"
                );
                return false;
            }
        };

        let authoritative = self.last_modified_at.get(&root);
        let cached = self.cached_as_of.get(id);
        let valid = matches!((authoritative, cached), (Some(a), Some(c)) if a == c);

        debug!(
            op = "freshness::is_valid",
            result = if valid { "fresh" } else { "stale" },
            node = %id,
            root = %root,
            last_edited = ?authoritative.map(ToString::to_string),
            cached_as_of = ?cached.map(ToString::to_string),
            "Validated cache entry"
        );
        valid
    }

    /// Replace all stamps, as read back from durable storage.
    pub fn restore_cached(&mut self, stamps: impl IntoIterator<Item = (NodeId, Timestamp)>) {
        self.cached_as_of = stamps.into_iter().collect();
    }

    pub fn cached_snapshot(&self) -> BTreeMap<NodeId, Timestamp> {
        self.cached_as_of
            .iter()
            .map(|(id, stamp)| (id.clone(), *stamp))
            .collect()
    }

    pub fn authoritative_len(&self) -> usize {
        self.last_modified_at.len()
    }

    pub fn cached_len(&self) -> usize {
        self.cached_as_of.len()
    }

    pub fn clear(&mut self) {
        self.last_modified_at.clear();
        self.cached_as_of.clear();
    }
}
