//! Content hash of the whole graph reachable from an output.
//!
//! Each node contributes its own `content_hash` and its parent count, folded
//! in DFS order with every node visited once per pass. Node uuids are not
//! part of the hash, so two graphs built separately with identical content
//! and topology share cache entries.

use log::debug;
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use crate::entities::{NodeRef, Output};

#[derive(Debug, Default)]
pub struct GraphVersion {
    value: u64,
}

impl GraphVersion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute from scratch and return the new value.
    pub fn recompute(&mut self, output: Option<&Output>) -> u64 {
        self.value = 0;
        let Some(output) = output else {
            return 0;
        };

        let mut hasher = DefaultHasher::new();
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<NodeRef> = vec![output.node()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.uuid()) {
                continue;
            }
            let parents = node.parents();
            node.content_hash().hash(&mut hasher);
            parents.len().hash(&mut hasher);
            // reverse so the first input is hashed first
            stack.extend(parents.into_iter().rev());
        }
        self.value = hasher.finish();
        debug!(
            "Graph version recomputed: {:016x} ({} nodes)",
            self.value,
            visited.len()
        );
        self.value
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}
