//! State every reference node carries: identity, parameters, inputs and the
//! last validated info. Interior mutability lets nodes be shared as
//! `Arc<dyn GraphNode>` across the control thread and row workers.

use std::sync::RwLock;
use uuid::Uuid;

use crate::entities::{AttrValue, Attrs, NodeInfo, NodeRef};

pub struct NodeCore {
    uuid: Uuid,
    name: String,
    attrs: RwLock<Attrs>,
    parents: RwLock<Vec<NodeRef>>,
    info: RwLock<NodeInfo>,
}

impl NodeCore {
    pub fn new(name: impl Into<String>, attrs: Attrs, parents: Vec<NodeRef>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            attrs: RwLock::new(attrs),
            parents: RwLock::new(parents),
            info: RwLock::new(NodeInfo::default()),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> String {
        self.name.clone()
    }

    pub fn attrs(&self) -> Attrs {
        self.attrs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Returns true if the value changed.
    pub fn set_attr(&self, key: &str, value: impl Into<AttrValue>) -> bool {
        self.attrs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_if_changed(key, value)
    }

    pub fn float(&self, key: &str, default: f32) -> f32 {
        self.attrs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get_float_or(key, default)
    }

    pub fn int(&self, key: &str, default: i32) -> i32 {
        self.attrs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get_i32_or(key, default)
    }

    pub fn parents(&self) -> Vec<NodeRef> {
        self.parents.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_parents(&self, parents: Vec<NodeRef>) {
        *self.parents.write().unwrap_or_else(|e| e.into_inner()) = parents;
    }

    pub fn info(&self) -> NodeInfo {
        *self.info.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_info(&self, info: NodeInfo) {
        *self.info.write().unwrap_or_else(|e| e.into_inner()) = info;
    }

    /// Union of the parents' last validated infos; the first input's display wins.
    pub fn parents_info(&self) -> NodeInfo {
        let parents = self.parents();
        let mut iter = parents.iter().map(|p| p.info());
        match iter.next() {
            Some(first) => iter.fold(first, |acc, info| acc.merge(&info)),
            None => NodeInfo::default(),
        }
    }
}
