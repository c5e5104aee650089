//! GradeNode - `out = in * gain + offset` on the colour channels.
//!
//! Results go through the row cache, so a grade feeding several consumers
//! (diamond graphs) evaluates its input once per row.

use std::sync::Arc;
use uuid::Uuid;

use super::node_core::NodeCore;
use crate::entities::keys::{A_GAIN, A_OFFSET};
use crate::entities::{
    AttrValue, Attrs, Channel, GraphNode, NodeInfo, NodeRef, Row, RowContext,
};

pub struct GradeNode {
    core: NodeCore,
}

impl GradeNode {
    pub fn new(name: &str, input: NodeRef, gain: f32, offset: f32) -> Arc<Self> {
        let attrs = Attrs::new().with(A_GAIN, gain).with(A_OFFSET, offset);
        Arc::new(Self {
            core: NodeCore::new(name, attrs, vec![input]),
        })
    }

    pub fn set_attr(&self, key: &str, value: impl Into<AttrValue>) {
        self.core.set_attr(key, value);
    }

    pub fn set_input(&self, input: NodeRef) {
        self.core.set_parents(vec![input]);
    }
}

impl GraphNode for GradeNode {
    fn uuid(&self) -> Uuid {
        self.core.uuid()
    }

    fn name(&self) -> String {
        self.core.name()
    }

    fn node_type(&self) -> &'static str {
        "Grade"
    }

    fn parents(&self) -> Vec<NodeRef> {
        self.core.parents()
    }

    fn attrs(&self) -> Attrs {
        self.core.attrs()
    }

    fn info(&self) -> NodeInfo {
        self.core.info()
    }

    fn validate(&self, _for_real: bool) {
        self.core.set_info(self.core.parents_info());
    }

    fn evaluate_row(&self, row: &mut Row, ctx: &RowContext<'_>) {
        let Some(input) = self.core.parents().into_iter().next() else {
            return;
        };
        let gain = self.core.float(A_GAIN, 1.0);
        let offset = self.core.float(A_OFFSET, 0.0);
        let key = row.key(self.uuid(), self.content_hash(), ctx.frame);

        ctx.cache.get_or_compute(key, row, &mut |row: &mut Row| {
            input.evaluate_row(row, ctx);
            for channel in [Channel::Red, Channel::Green, Channel::Blue] {
                if let Some(plane) = row.plane_mut(channel) {
                    plane.iter_mut().for_each(|v| *v = *v * gain + offset);
                }
            }
        });
    }
}
