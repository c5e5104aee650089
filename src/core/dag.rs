//! Engine-local view of the node graph feeding one output.
//!
//! `rebuild` collects every node reachable from the output over parent
//! edges, deduplicated by uuid, and records which of them are sources.
//! `topological_sort` is a DFS postorder guarded by a visited set, so each
//! node lands after all of its parents and a malformed cyclic graph still
//! terminates.

use indexmap::IndexMap;
use log::{debug, trace};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{NodeRef, Output};

#[derive(Default)]
pub struct Dag {
    output: Option<Output>,
    graph: IndexMap<Uuid, NodeRef>,
    sorted: Vec<NodeRef>,
    sources: Vec<NodeRef>,
    marked: HashSet<Uuid>,
    validated: bool,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refill the graph from `output` and resort. `None` empties everything.
    pub fn rebuild(&mut self, output: Option<Output>) {
        self.output = output;
        self.graph.clear();
        self.sources.clear();
        self.validated = false;

        if let Some(root) = self.output.as_ref().map(Output::node) {
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                let uuid = node.uuid();
                if self.graph.contains_key(&uuid) {
                    continue;
                }
                if node.as_source().is_some() {
                    self.sources.push(Arc::clone(&node));
                }
                stack.extend(node.parents());
                self.graph.insert(uuid, node);
            }
        }

        self.topological_sort();
        debug!(
            "Dag rebuilt: {} nodes, {} sources",
            self.graph.len(),
            self.sources.len()
        );
    }

    /// Resort from the current output. Parents precede children.
    pub fn topological_sort(&mut self) {
        self.sorted.clear();
        self.marked.clear();

        let Some(root) = self.output.as_ref().map(Output::node) else {
            return;
        };

        // (node, parents_done)
        let mut stack: Vec<(NodeRef, bool)> = vec![(root, false)];
        while let Some((node, parents_done)) = stack.pop() {
            if parents_done {
                self.sorted.push(node);
                continue;
            }
            if !self.marked.insert(node.uuid()) {
                continue;
            }
            let parents = node.parents();
            stack.push((node, true));
            for parent in parents.into_iter().rev() {
                if !self.marked.contains(&parent.uuid()) {
                    stack.push((parent, false));
                }
            }
        }
        trace!("Dag sorted: {:?}", self.debug_order());
    }

    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn sorted(&self) -> &[NodeRef] {
        &self.sorted
    }

    pub fn sources(&self) -> &[NodeRef] {
        &self.sources
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.graph.values()
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.graph.contains_key(uuid)
    }

    /// Whether the last sort visited `uuid`.
    pub fn is_marked(&self, uuid: &Uuid) -> bool {
        self.marked.contains(uuid)
    }

    /// True if at least one source has a non-empty frame range.
    pub fn has_frames(&self) -> bool {
        self.sources
            .iter()
            .filter_map(|s| s.as_source())
            .any(|s| s.has_frames())
    }

    /// First call validates the whole graph; later calls refresh sources only.
    pub fn validate(&mut self) {
        if !self.validated {
            for node in &self.sorted {
                node.validate(true);
            }
            self.validated = true;
            debug!("Dag validated ({} nodes)", self.sorted.len());
        } else {
            for node in &self.sources {
                node.validate(false);
            }
        }
    }

    /// Force the next `validate` to cover the whole graph again.
    pub fn invalidate(&mut self) {
        self.validated = false;
    }

    /// Output's validated frame range, `(0, 0)` without an output.
    pub fn frame_range(&self) -> (i32, i32) {
        match &self.output {
            Some(Output::Writer(w)) => (w.first_frame(), w.last_frame()),
            Some(out) => {
                let info = out.info();
                (info.first_frame, info.last_frame)
            }
            None => (0, 0),
        }
    }

    pub fn first_frame(&self) -> i32 {
        self.frame_range().0
    }

    pub fn last_frame(&self) -> i32 {
        self.frame_range().1
    }

    /// Sorted node names, for logs and tests.
    pub fn debug_order(&self) -> Vec<String> {
        self.sorted.iter().map(|n| n.name()).collect()
    }
}
